//! Service discovery.
//!
//! # Data Flow
//! ```text
//! Bootstrap (after each listener is serving)
//!     → Announcer::announce(endpoint)
//!     → CancelFn handed to the ShutdownCoordinator
//!
//! Shutdown
//!     → CancelFn withdraws the announcement
//! ```
//!
//! # Design Decisions
//! - Announcing is an optional registration: a failure is logged and the
//!   endpoint simply isn't advertised
//! - The file announcer writes one JSON record per endpoint so any process
//!   that can read a directory can discover the service

use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::lifecycle::shutdown::CancelFn;

/// Which surface an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Metrics,
    Rpc,
    Gateway,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::Metrics => "metrics",
            EndpointKind::Rpc => "rpc",
            EndpointKind::Gateway => "gateway",
        };
        f.write_str(name)
    }
}

/// One advertised endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub kind: EndpointKind,
    pub address: SocketAddr,
    pub tls: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("failed to write announcement {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Advertises endpoints; each announcement returns its withdrawal.
pub trait Announcer: Send + Sync {
    fn announce(&self, endpoint: &Endpoint) -> Result<CancelFn, AnnounceError>;
}

/// Announces by writing JSON records into a directory.
#[derive(Debug, Clone)]
pub struct FileAnnouncer {
    dir: PathBuf,
}

#[derive(Serialize)]
struct Record<'a> {
    #[serde(flatten)]
    endpoint: &'a Endpoint,
    pid: u32,
    announced_at: u64,
}

impl FileAnnouncer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path for `endpoint`.
    pub fn record_path(&self, endpoint: &Endpoint) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}.json",
            endpoint.service,
            endpoint.kind,
            endpoint.address.port()
        ))
    }
}

impl Announcer for FileAnnouncer {
    fn announce(&self, endpoint: &Endpoint) -> Result<CancelFn, AnnounceError> {
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let record = Record {
            endpoint,
            pid: std::process::id(),
            announced_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let json = serde_json::to_vec_pretty(&record)?;

        // Write then rename so readers never see a partial record.
        let path = self.record_path(endpoint);
        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(&json).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;

        tracing::info!(kind = %endpoint.kind, address = %endpoint.address, path = %path.display(), "Endpoint announced");

        let kind = endpoint.kind;
        Ok(Box::new(move || match std::fs::remove_file(&path) {
            Ok(()) => tracing::info!(kind = %kind, "Endpoint withdrawn"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(kind = %kind, error = %e, "Failed to withdraw endpoint"),
        }))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AnnounceError {
    let path = path.to_path_buf();
    move |source| AnnounceError::Io { path, source }
}
