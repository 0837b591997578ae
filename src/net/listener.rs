//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind each surface (RPC, gateway, exporter) to its configured address
//! - Report bind failures as fatal, naming the surface
//! - Log the bound address (which differs from the configured one for port 0)

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::error::Error;

/// A bound listener, tagged with the surface it serves.
#[derive(Debug)]
pub struct Listener {
    name: &'static str,
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `address` for the named surface.
    pub async fn bind(name: &'static str, address: &str) -> Result<Self, Error> {
        let bind_error = |source| Error::Bind {
            name,
            addr: address.to_string(),
            source,
        };

        let inner = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(listener = name, address = %local_addr, "Listener bound");

        Ok(Self {
            name,
            inner,
            local_addr,
        })
    }

    /// Surface name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Give up the tagging and return the tokio listener.
    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = Listener::bind("test", "127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(listener.name(), "test");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = Listener::bind("first", "127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();
        let err = Listener::bind("second", &taken).await.unwrap_err();
        match err {
            Error::Bind { name, addr, .. } => {
                assert_eq!(name, "second");
                assert_eq!(addr, taken);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
