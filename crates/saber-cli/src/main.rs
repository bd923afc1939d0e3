//! `saber-cli` – Saber command line interface
//!
//! One binary, three roles:
//!
//! * `saber relay`  – run the fan-out relay;
//! * `saber viewer` – connect, reconstruct the hilt pose and report blade hits;
//! * `saber sensor` – connect and stream orientation samples from stdin (or a
//!   synthetic sweep).
//!
//! `saber config` writes the default `~/.saber/config.toml`.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use saber_client::{ConnectionSession, SessionConfig, SessionHandle, WsConnector};
use saber_perception::CollisionDetector;
use saber_relay::RelayServer;
use saber_runtime::{Viewer, stream_samples, sweep_sample};
use saber_types::{SaberError, SessionState};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion-controlled saber: relay, viewer and sensor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the telemetry relay.
    Relay {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// PEM certificate chain; requires --tls-key.
        #[arg(long, requires = "tls_key")]
        tls_cert: Option<PathBuf>,
        #[arg(long, requires = "tls_cert")]
        tls_key: Option<PathBuf>,
        /// Serve plaintext ws:// when no certificate is configured.
        #[arg(long)]
        insecure: bool,
    },
    /// Follow the relay and report blade hits.
    Viewer {
        /// Relay URL, e.g. wss://relay.example:3000.
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        tick_hz: Option<u32>,
    },
    /// Send orientation samples to the relay.
    Sensor {
        #[arg(long)]
        url: Option<String>,
        /// Generate a synthetic sweep at this rate (Hz) instead of reading stdin.
        #[arg(long)]
        sweep: Option<f64>,
    },
    /// Write the default configuration file.
    Config {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let _guard = saber_runtime::telemetry::init_tracing("saber");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command)) {
        error!(error = %e, "fatal");
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), SaberError> {
    match command {
        Command::Config { force } => write_default_config(force),
        Command::Relay { host, port, tls_cert, tls_key, insecure } => {
            let mut cfg = config::resolve()?;
            if let Some(host) = host {
                cfg.relay.host = host;
            }
            if let Some(port) = port {
                cfg.relay.port = port;
            }
            if tls_cert.is_some() {
                cfg.relay.tls_cert = tls_cert;
                cfg.relay.tls_key = tls_key;
            }
            if insecure {
                cfg.relay.insecure = true;
            }
            run_relay(&cfg).await
        }
        Command::Viewer { url, tick_hz } => {
            let mut cfg = config::resolve()?;
            if let Some(url) = url {
                cfg.client.url = url;
            }
            if let Some(hz) = tick_hz {
                cfg.viewer.tick_hz = hz;
            }
            run_viewer(&cfg).await
        }
        Command::Sensor { url, sweep } => {
            let mut cfg = config::resolve()?;
            if let Some(url) = url {
                cfg.client.url = url;
            }
            run_sensor(&cfg, sweep).await
        }
    }
}

fn write_default_config(force: bool) -> Result<(), SaberError> {
    let path = config::config_path();
    if path.exists() && !force {
        println!(
            "  {} already exists (use {} to overwrite)",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(());
    }
    config::save(&config::Config::default())?;
    println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

async fn run_relay(cfg: &config::Config) -> Result<(), SaberError> {
    let bound = RelayServer::new(cfg.relay.to_relay_config()?).bind().await?;
    let scheme = if bound.is_tls() { "wss" } else { "ws" };
    if !bound.is_tls() {
        println!("  {} TLS disabled (--insecure); traffic is plaintext", "!".yellow().bold());
    }
    println!(
        "  {} relay listening on {}",
        "●".green(),
        format!("{scheme}://{}", bound.local_addr()).bold()
    );

    tokio::select! {
        served = bound.serve() => served,
        _ = tokio::signal::ctrl_c() => {
            println!("\n  {}", "Shutting down relay.".yellow());
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client roles
// ─────────────────────────────────────────────────────────────────────────────

fn open_session(cfg: &config::Config) -> (SessionHandle, mpsc::Receiver<bytes::Bytes>) {
    let session_config = SessionConfig::default().with_reconnect_delay(cfg.client.reconnect_delay());
    let (session, handle, frames) =
        ConnectionSession::new(WsConnector::new(cfg.client.url.clone()), session_config);
    tokio::spawn(session.run());
    (handle, frames)
}

/// Print every connected/disconnected transition.
fn spawn_status_printer(handle: &SessionHandle, url: String) {
    let mut states = handle.subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                SessionState::Connected => println!("  {} connected to {}", "●".green(), url.bold()),
                SessionState::Disconnected => {
                    println!("  {} disconnected; retrying", "●".red())
                }
                SessionState::Connecting => {}
            }
        }
    });
}

async fn run_viewer(cfg: &config::Config) -> Result<(), SaberError> {
    let mut detector = CollisionDetector::new(cfg.viewer.blade());
    for entry in &cfg.scene {
        detector.register_collider(&entry.to_object());
    }
    info!(colliders = cfg.scene.len(), url = %cfg.client.url, "viewer starting");

    let (handle, frames) = open_session(cfg);
    spawn_status_printer(&handle, cfg.client.url.clone());

    let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
    let viewer = Viewer::new(detector, cfg.viewer.tick_hz).with_hit_reporter(hit_tx);
    let pose = viewer.pose();
    let viewer_task = tokio::spawn(viewer.run(frames));

    let mut status = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            Some(hit) = hit_rx.recv() => {
                println!("  {} {}", "✦ hit".magenta().bold(), hit.object.bold());
            }
            _ = status.tick() => {
                let q = pose.current();
                println!(
                    "  {}",
                    format!("pose w={:+.3} x={:+.3} y={:+.3} z={:+.3}", q.w, q.x, q.y, q.z).dimmed()
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    viewer_task.abort();
    println!("\n  {}", "Viewer stopped.".yellow());
    Ok(())
}

async fn run_sensor(cfg: &config::Config, sweep: Option<f64>) -> Result<(), SaberError> {
    let (handle, _frames) = open_session(cfg);
    spawn_status_printer(&handle, cfg.client.url.clone());

    if !handle.wait_for_state(SessionState::Connected).await {
        return Err(SaberError::Transport("session ended before connecting".to_string()));
    }

    match sweep {
        Some(hz) => {
            if !(hz > 0.0 && hz.is_finite()) {
                return Err(SaberError::Config(format!("--sweep must be a positive rate, got {hz}")));
            }
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        handle.send_frame_when_ready(&sweep_sample(started.elapsed())).await;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let stats = tokio::select! {
                stats = stream_samples(stdin, &handle) => stats?,
                _ = tokio::signal::ctrl_c() => return Ok(()),
            };
            if !handle.flush().await {
                warn!("connection lost before every queued sample was written");
            }
            println!(
                "  {} sent {} sample(s), dropped {}, invalid {}",
                "✓".green().bold(),
                stats.sent,
                stats.dropped,
                stats.invalid
            );
        }
    }
    Ok(())
}
