//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT or SIGTERM (Ctrl+C elsewhere)
//! - Report which signal arrived so the caller can log it
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - No other signals are handled; SIGHUP keeps its default behaviour

use std::fmt;

/// A termination request from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => f.write_str("SIGINT"),
            Termination::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolve on the next termination signal.
#[cfg(unix)]
pub async fn wait_for_termination() -> std::io::Result<Termination> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => Ok(Termination::Interrupt),
        _ = terminate.recv() => Ok(Termination::Terminate),
    }
}

/// Resolve on the next termination signal.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> std::io::Result<Termination> {
    tokio::signal::ctrl_c().await?;
    Ok(Termination::Interrupt)
}
