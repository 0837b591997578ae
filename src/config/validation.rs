//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, intervals > 0)
//! - Require certificate material wherever TLS is switched on
//! - Detect port collisions between the three listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Port 0 means "any free port" and never collides

use std::fmt;

use crate::config::schema::ServiceConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("service_name", "must not be empty"));
    }

    for (field, host) in [
        ("rpc.host", &config.rpc.host),
        ("gateway.host", &config.gateway.host),
        ("metrics.host", &config.metrics.host),
    ] {
        if host.trim().is_empty() {
            errors.push(ValidationError::new(field, "must not be empty"));
        }
    }

    if config.metrics.cache_size == 0 {
        errors.push(ValidationError::new("metrics.cache_size", "must be greater than 0"));
    }
    if config.metrics.queue_capacity == 0 {
        errors.push(ValidationError::new("metrics.queue_capacity", "must be greater than 0"));
    }

    if config.gateway.enabled {
        if config.gateway.connect_attempts == 0 {
            errors.push(ValidationError::new("gateway.connect_attempts", "must be at least 1"));
        }
        if config.gateway.request_timeout_secs == 0 {
            errors.push(ValidationError::new("gateway.request_timeout_secs", "must be greater than 0"));
        }
    }

    let shared_identity = !config.tls.server_cert_path.is_empty() && !config.tls.server_key_path.is_empty();
    if config.rpc.use_tls {
        if !shared_identity || config.tls.ca_cert_path.is_empty() {
            errors.push(ValidationError::new(
                "tls",
                "rpc.use_tls requires ca_cert_path, server_cert_path and server_key_path",
            ));
        }
        if config.gateway.enabled && config.tls.server_cert_name.is_empty() {
            errors.push(ValidationError::new(
                "tls.server_cert_name",
                "required when the gateway connects to a TLS backend",
            ));
        }
    }
    if config.gateway.enabled && config.gateway.use_tls && !shared_identity {
        errors.push(ValidationError::new(
            "tls",
            "gateway.use_tls requires server_cert_path and server_key_path",
        ));
    }
    if config.metrics.use_tls {
        let cert = config.metrics.cert_path.as_deref().unwrap_or(&config.tls.server_cert_path);
        let key = config.metrics.key_path.as_deref().unwrap_or(&config.tls.server_key_path);
        if cert.is_empty() || key.is_empty() {
            errors.push(ValidationError::new(
                "metrics",
                "metrics.use_tls requires a certificate and key",
            ));
        }
    }

    if config.statsd.enabled {
        if config.statsd.host.trim().is_empty() {
            errors.push(ValidationError::new("statsd.host", "must not be empty"));
        }
        if config.statsd.flush_interval_ms == 0 {
            errors.push(ValidationError::new("statsd.flush_interval_ms", "must be greater than 0"));
        }
    }

    if config.discovery.enabled
        && config.discovery.announce_dir.as_deref().map_or(true, |d| d.trim().is_empty())
    {
        errors.push(ValidationError::new("discovery.announce_dir", "required when discovery is enabled"));
    }

    let mut ports = vec![("rpc.port", config.rpc.port), ("metrics.port", config.metrics.port)];
    if config.gateway.enabled {
        ports.push(("gateway.port", config.gateway.port));
    }
    for (i, (field, port)) in ports.iter().enumerate() {
        if *port == 0 {
            continue;
        }
        if let Some((other, _)) = ports[..i].iter().find(|(_, p)| p == port) {
            errors.push(ValidationError::new(
                *field,
                format!("port {} already used by {}", port, other),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
