//! Configuration file – reads/writes `~/.saber/config.toml`.

use saber_perception::{BladeGeometry, SceneObject, Vec3};
use saber_relay::{RelayConfig, TlsPaths};
use saber_types::SaberError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted configuration stored in `~/.saber/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub viewer: ViewerSection,

    /// Static colliders placed around the hilt.
    #[serde(default = "default_scene")]
    pub scene: Vec<SceneEntry>,
}

/// `[relay]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_host")]
    pub host: String,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// PEM certificate chain.  Both paths are required unless `insecure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<PathBuf>,

    /// Serve plaintext `ws://` when no certificate is configured.
    #[serde(default)]
    pub insecure: bool,

    /// Per-session outbound queue depth.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

/// `[client]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// `[viewer]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSection {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    #[serde(default = "default_blade_radius")]
    pub blade_radius: f64,

    #[serde(default = "default_blade_length")]
    pub blade_length: f64,

    /// Distance from the hilt origin to the blade centre.
    #[serde(default = "default_blade_offset")]
    pub blade_offset: f64,

    /// World position of the hilt.
    #[serde(default)]
    pub hilt: [f64; 3],
}

/// One `[[scene]]` entry: an axis-aligned box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntry {
    pub name: String,
    pub center: [f64; 3],
    pub half_extents: [f64; 3],
}

fn default_relay_host() -> String {
    saber_relay::DEFAULT_HOST.to_string()
}
fn default_relay_port() -> u16 {
    saber_relay::DEFAULT_PORT
}
fn default_send_queue() -> usize {
    saber_relay::DEFAULT_SEND_QUEUE
}
fn default_url() -> String {
    format!("wss://localhost:{}", saber_relay::DEFAULT_PORT)
}
fn default_reconnect_delay_ms() -> u64 {
    saber_client::DEFAULT_RECONNECT_DELAY.as_millis() as u64
}
fn default_tick_hz() -> u32 {
    saber_runtime::DEFAULT_TICK_HZ
}
fn default_blade_radius() -> f64 {
    BladeGeometry::default().radius
}
fn default_blade_length() -> f64 {
    BladeGeometry::default().length
}
fn default_blade_offset() -> f64 {
    BladeGeometry::default().offset
}
fn default_scene() -> Vec<SceneEntry> {
    vec![
        SceneEntry {
            name: "left-drone".to_string(),
            center: [-0.9, 0.6, 0.0],
            half_extents: [0.15, 0.15, 0.15],
        },
        SceneEntry {
            name: "right-drone".to_string(),
            center: [0.9, 0.6, 0.0],
            half_extents: [0.15, 0.15, 0.15],
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelaySection::default(),
            client: ClientSection::default(),
            viewer: ViewerSection::default(),
            scene: default_scene(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            tls_cert: None,
            tls_key: None,
            insecure: false,
            send_queue: default_send_queue(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for ViewerSection {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            blade_radius: default_blade_radius(),
            blade_length: default_blade_length(),
            blade_offset: default_blade_offset(),
            hilt: [0.0; 3],
        }
    }
}

impl RelaySection {
    /// Build the server configuration.
    ///
    /// Setting only one of `tls_cert`/`tls_key` is an error rather than a
    /// silent fallback to plaintext.
    pub fn to_relay_config(&self) -> Result<RelayConfig, SaberError> {
        let mut config = RelayConfig::default()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_send_queue(self.send_queue);
        if self.insecure {
            config = config.with_insecure();
        }
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(config.with_tls(TlsPaths::new(cert, key))),
            (None, None) => Ok(config),
            _ => Err(SaberError::Config(
                "tls_cert and tls_key must be set together".to_string(),
            )),
        }
    }
}

impl ClientSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl ViewerSection {
    pub fn blade(&self) -> BladeGeometry {
        BladeGeometry {
            radius: self.blade_radius,
            length: self.blade_length,
            offset: self.blade_offset,
            anchor: vec3(self.hilt),
        }
    }
}

impl SceneEntry {
    pub fn to_object(&self) -> SceneObject {
        SceneObject::cuboid(self.name.clone(), vec3(self.center), vec3(self.half_extents))
    }
}

fn vec3([x, y, z]: [f64; 3]) -> Vec3 {
    Vec3::new(x, y, z)
}

/// Return the path to `~/.saber/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".saber").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, SaberError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SaberError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| SaberError::Config(format!("reading {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| SaberError::Config(format!("parsing {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// File config (or defaults) with `SABER_*` overrides applied.
pub fn resolve() -> Result<Config, SaberError> {
    let mut cfg = load()?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `SABER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SABER_RELAY_HOST` | `relay.host` |
/// | `SABER_RELAY_PORT` | `relay.port` |
/// | `SABER_URL` | `client.url` |
/// | `SABER_RECONNECT_MS` | `client.reconnect_delay_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SABER_RELAY_HOST") {
        cfg.relay.host = v;
    }
    if let Ok(v) = std::env::var("SABER_RELAY_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.relay.port = port;
    }
    if let Ok(v) = std::env::var("SABER_URL") {
        cfg.client.url = v;
    }
    if let Ok(v) = std::env::var("SABER_RECONNECT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.client.reconnect_delay_ms = ms;
    }
}

/// Save the config to disk, creating `~/.saber/` if necessary.
pub fn save(cfg: &Config) -> Result<(), SaberError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), SaberError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SaberError::Config(format!("creating {}: {e}", parent.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| SaberError::Config(format!("chmod {}: {e}", parent.display())))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| SaberError::Config(format!("serializing config: {e}")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| SaberError::Config(format!("writing {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| SaberError::Config(format!("writing {}: {e}", path.display())))?;
    Ok(())
}
