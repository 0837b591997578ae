//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Load TLS → Bind RPC → Metrics pipeline + exporter
//!     → Serve RPC → Attach gateway → Serving
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel context → Cancel callbacks (append order)
//!     → Stop RPC listener → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: a component is only announced or connected to once it is serving
//! - One coordinator owns teardown; no global cancel list
//! - Every teardown step is bounded: callbacks time out, the listener has a grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{CancelFn, Shutdown, ShutdownCoordinator, ShutdownReport, ShutdownSignal};
pub use signals::{wait_for_termination, Termination};
pub use startup::{Bootstrap, RunningService, Stage};
