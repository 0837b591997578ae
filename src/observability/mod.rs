//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! RPC call (rpc::instrument)
//!     → MetricEvent (event.rs)
//!     → Subject::emit (subject.rs, never blocks the caller)
//!     → one bounded cursor + OS thread per Observer
//!     → RpcObserver | RuntimeObserver | StatsdObserver (observers/)
//!
//! GET /metrics (exporter.rs)
//!     → Observer::report for each observer
//!     → merged JSON, failing sections marked in place
//! ```
//!
//! # Design Decisions
//! - Push into observers, pull out of them; the exporter never reads the stream
//! - Observer failures stay inside the metrics pipeline
//! - Structured logging via `tracing` (logging.rs)

pub mod event;
pub mod exporter;
pub mod logging;
pub mod observer;
pub mod observers;
pub mod subject;

pub use event::{MetricEvent, Outcome};
pub use observer::{Observer, ObserverError};
pub use subject::{ObserverStats, Subject, SubjectStats};
