//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Read PEM material from disk and check it parses before anything binds
//! - Build the RPC server context (client certificates required)
//! - Build the gateway's backend client context
//! - Build the rustls acceptor used by the HTTP surfaces

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Once;

use axum_server::tls_rustls::RustlsConfig;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::{MetricsConfig, TlsConfig};

/// Error type for certificate loading and TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("certificate file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0:?}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("TLS setup rejected: {0}")]
    Rejected(String),
}

/// PEM-encoded certificate and key, validated at load time.
#[derive(Clone)]
pub struct PemIdentity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for PemIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemIdentity")
            .field("cert_len", &self.cert.len())
            .finish_non_exhaustive()
    }
}

/// Certificate authority plus identity, as used by the RPC listener and its gateway client.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub identity: PemIdentity,
    /// Name the client expects in the server certificate.
    pub server_name: String,
}

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(TlsError::NotFound(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a PEM file and check it holds at least one certificate.
pub fn load_certificates(path: &Path) -> Result<Vec<u8>, TlsError> {
    let pem = read_file(path)?;
    let mut reader = BufReader::new(pem.as_slice());
    let mut found = false;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        found = true;
    }
    if !found {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(pem)
}

/// Read a PEM file and check it holds a private key.
pub fn load_private_key(path: &Path) -> Result<Vec<u8>, TlsError> {
    let pem = read_file(path)?;
    let mut reader = BufReader::new(pem.as_slice());
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(pem),
        Ok(None) => Err(TlsError::NoPrivateKey(path.to_path_buf())),
        Err(source) => Err(TlsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Load a certificate/key pair.
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<PemIdentity, TlsError> {
    Ok(PemIdentity {
        cert: load_certificates(cert_path)?,
        key: load_private_key(key_path)?,
    })
}

/// Load the shared CA and server identity.
pub fn load_material(config: &TlsConfig) -> Result<TlsMaterial, TlsError> {
    let ca = load_certificates(Path::new(&config.ca_cert_path))?;
    let identity = load_identity(
        Path::new(&config.server_cert_path),
        Path::new(&config.server_key_path),
    )?;

    tracing::debug!(
        ca = %config.ca_cert_path,
        cert = %config.server_cert_path,
        server_name = %config.server_cert_name,
        "TLS material loaded"
    );

    Ok(TlsMaterial {
        ca,
        identity,
        server_name: config.server_cert_name.clone(),
    })
}

/// Load the exporter's own identity, falling back to the shared server identity.
pub fn load_metrics_identity(metrics: &MetricsConfig, shared: &TlsConfig) -> Result<PemIdentity, TlsError> {
    let cert = metrics.cert_path.as_deref().unwrap_or(&shared.server_cert_path);
    let key = metrics.key_path.as_deref().unwrap_or(&shared.server_key_path);
    load_identity(Path::new(cert), Path::new(key))
}

/// Server context for the RPC listener: presents the server identity and
/// requires client certificates issued by the CA.
pub fn rpc_server_config(material: &TlsMaterial) -> ServerTlsConfig {
    ServerTlsConfig::new()
        .identity(Identity::from_pem(&material.identity.cert, &material.identity.key))
        .client_ca_root(Certificate::from_pem(&material.ca))
}

/// Client context for the gateway's connection to the RPC listener.
pub fn rpc_client_config(material: &TlsMaterial) -> ClientTlsConfig {
    ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(&material.ca))
        .identity(Identity::from_pem(&material.identity.cert, &material.identity.key))
        .domain_name(material.server_name.clone())
}

/// Rustls acceptor for an HTTP surface.
pub async fn http_server_config(identity: &PemIdentity) -> Result<RustlsConfig, TlsError> {
    install_crypto_provider();
    RustlsConfig::from_pem(identity.cert.clone(), identity.key.clone())
        .await
        .map_err(|e| TlsError::Rejected(e.to_string()))
}
