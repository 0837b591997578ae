//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway attaching to the RPC backend:
//!     → backoff.rs (retry the connect with exponential backoff + jitter)
//!     → give up after a bounded number of attempts → RegistrationError
//! ```
//!
//! # Design Decisions
//! - Every retry loop is bounded; nothing at boot retries forever
//! - Jitter keeps several replicas from reconnecting in lockstep

pub mod backoff;

pub use backoff::{calculate_backoff, retry, RetryPolicy};
