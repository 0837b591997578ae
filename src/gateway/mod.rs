//! HTTP/JSON gateway subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request (optional TLS)
//!     → request id, timeout, body limit (tower-http)
//!     → routes.rs (JSON or path → HelloRequest, headers → metadata)
//!     → client.rs (one channel to the RPC backend, same path as any RPC client)
//!     → RPC reply → JSON, or status → JSON error + mapped HTTP status
//! ```
//!
//! # Design Decisions
//! - The gateway is an ordinary RPC client; calls through it are instrumented
//!   by the backend exactly like direct calls
//! - The backend connection is established eagerly at attach time so a
//!   missing backend surfaces at boot, not on the first request

pub mod client;
pub mod routes;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tonic::transport::ClientTlsConfig;

use crate::config::GatewayConfig;
use crate::error::Error;
use crate::resilience::RetryPolicy;

pub use client::{connect_backend, dial_addr};
pub use routes::{http_status, router, ErrorBody, GatewayError, HelloBody, HelloReply};

/// Connect to the backend listening on `backend` and build the gateway router.
pub async fn attach(
    config: &GatewayConfig,
    backend: SocketAddr,
    tls: Option<ClientTlsConfig>,
    access_log: bool,
) -> Result<Router, Error> {
    let client = connect_backend(dial_addr(backend), tls, RetryPolicy::for_gateway(config)).await?;
    Ok(router(
        client,
        Duration::from_secs(config.request_timeout_secs),
        access_log,
    ))
}
