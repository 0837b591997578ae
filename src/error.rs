//! Error taxonomy for the service.
//!
//! # Design Decisions
//! - Boot-time variants (configuration, bind, TLS, registration) are fatal
//!   and surface in `main` as a non-zero exit
//! - Per-call failures never appear here: they are `tonic::Status` on the
//!   RPC surface and a JSON error body on the gateway
//! - Metric pipeline failures are isolated to one observer and only ever
//!   logged or reported as a marked section

use std::net::SocketAddr;

use crate::config::loader::ConfigError;
use crate::net::tls::TlsError;
use crate::observability::observer::ObserverError;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while starting, running or stopping the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing startup parameter, or a lifecycle call made out of order.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A listener could not acquire its address.
    #[error("failed to bind {name} listener on {addr}: {source}")]
    Bind {
        name: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key material could not be loaded or applied.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The gateway could not attach to the RPC backend.
    #[error("gateway registration against {backend} failed after {attempts} attempt(s): {reason}")]
    Registration {
        backend: SocketAddr,
        attempts: u32,
        reason: String,
    },

    /// An observer failed to report.
    #[error(transparent)]
    MetricPipeline(#[from] ObserverError),

    /// A running listener task failed.
    #[error("{name} listener failed: {reason}")]
    Serve { name: &'static str, reason: String },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message_names_listener() {
        let err = Error::Bind {
            name: "rpc",
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("rpc"));
        assert!(msg.contains("127.0.0.1:1"));
    }

    #[test]
    fn test_observer_error_converts_to_metric_pipeline() {
        let err = Error::from(ObserverError::Report {
            observer: "rpc".into(),
            reason: "boom".into(),
        });
        assert!(matches!(err, Error::MetricPipeline(_)));
        assert!(err.to_string().contains("boom"));
    }
}
