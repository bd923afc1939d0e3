//! TLS termination for the relay listener.
//!
//! Loads a PEM certificate chain and private key into a rustls
//! [`ServerConfig`] using the `ring` crypto provider.  Any problem with the
//! credentials is reported as [`SaberError::Tls`] so the server refuses to
//! start instead of silently serving plaintext.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use saber_types::SaberError;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Locations of the PEM-encoded certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SaberError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| SaberError::Tls(format!("reading certificate {}: {e}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SaberError::Tls(format!("parsing certificate {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(SaberError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SaberError> {
    PrivateKeyDer::from_pem_file(path)
        .map_err(|e| SaberError::Tls(format!("reading private key {}: {e}", path.display())))
}

/// Build a [`TlsAcceptor`] from the configured credentials.
///
/// # Errors
///
/// Returns [`SaberError::Tls`] if either file is missing, unreadable, empty
/// or rejected by rustls.
pub fn load_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, SaberError> {
    let certs = load_certs(&paths.cert)?;
    let key = load_key(&paths.key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| SaberError::Tls(format!("protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| SaberError::Tls(format!("certificate rejected: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
