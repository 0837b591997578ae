//! HTTP serving shared by the gateway and the metrics exporter.
//!
//! # Data Flow
//! ```text
//! Listener (bound by the bootstrap)
//!     → server.rs (plain or rustls-terminated Axum serving)
//!     → gateway router | exporter router
//! ```

pub mod server;

pub use server::HttpServer;
