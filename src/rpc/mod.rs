//! Binary RPC subsystem.
//!
//! # Data Flow
//! ```text
//! gRPC call (HTTP/2, optional mTLS)
//!     → server.rs (tonic server on the pre-bound listener)
//!     → instrument.rs (tower layer: times the call, emits one MetricEvent on
//!       every exit path, including calls no handler accepts)
//!     → service.rs (business method)
//! ```
//!
//! # Design Decisions
//! - Instrumentation wraps the server's routes, never the other way round, so
//!   a metric failure can't change a call's result
//! - The listener is bound before the server is built; serving starts only
//!   after the bind succeeded

pub mod instrument;
pub mod server;
pub mod service;

/// Generated protobuf messages, server and client.
pub mod proto {
    tonic::include_proto!("eyepi");
}

pub use instrument::{CallMetricsLayer, RecordSizes};
pub use server::{RpcServer, RpcServerHandle};
pub use service::EyePiService;

/// Fully qualified path of the `HelloProxy` method.
pub const HELLO_PROXY: &str = "/eyepi.EyePi/HelloProxy";
