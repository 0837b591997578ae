//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once per process
//! - Pick the level from `RUST_LOG`, falling back to the verbose flag
//! - Switch between human-readable and JSON-lines output
//!
//! # Design Decisions
//! - `RUST_LOG` always wins over the config file
//! - Installing twice is not an error; tests and embedders may race to it

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Default filter directives for a verbosity setting.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "eyepi=debug,tower_http=debug,tonic=info,info"
    } else {
        "eyepi=info,warn"
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}
