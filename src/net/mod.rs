//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (bind, fatal on failure)
//!     → tls.rs (optional TLS context, built before anything binds)
//!     → Hand off to the RPC server, the gateway or the exporter
//! ```
//!
//! # Design Decisions
//! - Every surface binds before it is announced or connected to
//! - TLS material is read and parsed once at boot; a bad file stops startup
//! - Per-connection handshake failures only reject that connection

pub mod listener;
pub mod tls;

pub use listener::Listener;
