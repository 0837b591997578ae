//! Concrete observers.
//!
//! - `rpc`: ring buffer of recent calls plus cumulative counters
//! - `runtime`: uptime and a private Prometheus recorder
//! - `statsd`: aggregated push to a StatsD daemon (optional)

pub mod rpc;
pub mod runtime;
pub mod statsd;

pub use rpc::{LatencySummary, RpcObserver};
pub use runtime::RuntimeObserver;
pub use statsd::StatsdObserver;
