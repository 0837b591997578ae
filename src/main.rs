//! EyePi service binary.
//!
//! Loads configuration, starts the RPC listener, the optional HTTP/JSON
//! gateway and the metrics exporter, then waits for SIGINT/SIGTERM and runs
//! the shutdown coordinator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use eyepi::config::{load_config, ServiceConfig};
use eyepi::lifecycle::{wait_for_termination, Bootstrap};
use eyepi::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "eyepi")]
#[command(about = "gRPC service with an HTTP/JSON gateway and metrics exporter", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging and the gateway access log.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("eyepi: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ServiceConfig::default(),
    };
    if cli.verbose {
        config.logging.verbose = true;
    }

    init_logging(&config.logging);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), service = %config.service_name, "eyepi starting");

    let service = match Bootstrap::new(config) {
        Ok(bootstrap) => match bootstrap.start().await {
            Ok(service) => service,
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match wait_for_termination().await {
        Ok(signal) => tracing::info!(signal = %signal, "Termination signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for signals, shutting down"),
    }

    // Later signals are logged; the coordinator ignores repeated shutdowns.
    let coordinator = service.coordinator();
    tokio::spawn(async move {
        while let Ok(signal) = wait_for_termination().await {
            tracing::warn!(signal = %signal, "Shutdown already in progress");
            coordinator.shutdown().await;
        }
    });

    match service.shutdown().await {
        Some(report) if report.failed.is_empty() && report.timed_out.is_empty() => {
            tracing::info!("Shutdown complete");
        }
        Some(report) => {
            tracing::warn!(
                failed = ?report.failed,
                timed_out = ?report.timed_out,
                "Shutdown complete with skipped callbacks"
            );
        }
        None => tracing::info!("Shutdown complete"),
    }
    ExitCode::SUCCESS
}
