//! EyePi: a gRPC service with an HTTP/JSON gateway and a pluggable metrics pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!   gRPC client ───────────────────────────────┐
//!                                              ▼
//!   HTTP/JSON client ─▶ gateway ─▶ (gRPC) ─▶ rpc server ─▶ instrument ─▶ service
//!                                                              │
//!                                                              ▼ MetricEvent
//!                                                           Subject
//!                                                 ┌────────────┼────────────┐
//!                                                 ▼            ▼            ▼
//!                                            RpcObserver RuntimeObserver StatsdObserver
//!                                                 ▲            ▲            ▲
//!   metrics client ─▶ exporter (GET /metrics) ────┴────────────┴────────────┘
//! ```
//!
//! Startup and teardown are owned by `lifecycle`: the bootstrap brings the
//! listeners up in dependency order and the shutdown coordinator unwinds them.

// Core subsystems
pub mod config;
pub mod gateway;
pub mod http;
pub mod net;
pub mod rpc;

// Cross-cutting concerns
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use lifecycle::{Bootstrap, RunningService, Shutdown, ShutdownCoordinator};
