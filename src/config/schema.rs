//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name used in logs, statsd keys and discovery records.
    pub service_name: String,

    /// Binary RPC listener.
    pub rpc: RpcConfig,

    /// HTTP/JSON gateway in front of the RPC listener.
    pub gateway: GatewayConfig,

    /// Metrics exporter endpoint and observer sizing.
    pub metrics: MetricsConfig,

    /// Shared certificate material.
    pub tls: TlsConfig,

    /// Optional statsd push sink.
    pub statsd: StatsdConfig,

    /// Optional endpoint announcement.
    pub discovery: DiscoveryConfig,

    /// Teardown bounds.
    pub shutdown: ShutdownConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "eyepi".to_string(),
            rpc: RpcConfig::default(),
            gateway: GatewayConfig::default(),
            metrics: MetricsConfig::default(),
            tls: TlsConfig::default(),
            statsd: StatsdConfig::default(),
            discovery: DiscoveryConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Binary RPC listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,

    /// Require TLS (with client certificates) on the RPC listener.
    pub use_tls: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            use_tls: false,
        }
    }
}

impl RpcConfig {
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// HTTP/JSON gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Start the gateway at all.
    pub enabled: bool,

    pub host: String,
    pub port: u16,

    /// Serve the gateway over HTTPS.
    pub use_tls: bool,

    /// Treat a failure to attach the gateway as fatal for the whole process.
    pub required: bool,

    /// Attempts to connect to the RPC backend before giving up.
    pub connect_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub connect_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub connect_max_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            use_tls: false,
            required: false,
            connect_attempts: 5,
            connect_base_delay_ms: 100,
            connect_max_delay_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Metrics exporter and observer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,

    /// Serve the exporter over HTTPS.
    pub use_tls: bool,

    /// Exporter certificate; falls back to `tls.server_cert_path`.
    pub cert_path: Option<String>,

    /// Exporter key; falls back to `tls.server_key_path`.
    pub key_path: Option<String>,

    /// Number of recent events kept by the RPC observer.
    pub cache_size: usize,

    /// Per-observer window of undelivered events before the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10001,
            use_tls: false,
            cert_path: None,
            key_path: None,
            cache_size: 1024,
            queue_capacity: 4096,
        }
    }
}

impl MetricsConfig {
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Certificate material shared by the RPC listener, its gateway client and the gateway.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate authority (PEM).
    pub ca_cert_path: String,

    /// Server certificate (PEM), also presented by the gateway's backend client.
    pub server_cert_path: String,

    /// Server private key (PEM).
    pub server_key_path: String,

    /// Name the gateway expects in the RPC server's certificate.
    pub server_cert_name: String,
}

/// Statsd push sink.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsdConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,

    /// Key prefix; defaults to the service name when empty.
    pub prefix: String,

    /// Flush interval in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8125,
            prefix: String::new(),
            flush_interval_ms: 1000,
        }
    }
}

impl StatsdConfig {
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Endpoint announcement.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,

    /// Directory receiving one record per announced endpoint.
    pub announce_dir: Option<String>,
}

/// Shutdown bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound for each teardown callback in milliseconds.
    pub callback_timeout_ms: u64,

    /// How long in-flight RPCs may drain before the listener task is aborted.
    pub listener_grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            callback_timeout_ms: 5000,
            listener_grace_ms: 1000,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Debug level for the service and an access log on the gateway.
    pub verbose: bool,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.service_name, "eyepi");
        assert_eq!(config.rpc.port, 10000);
        assert!(config.gateway.enabled);
        assert!(!config.statsd.enabled);
        assert_eq!(config.metrics.cache_size, 1024);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [gateway]
            port = 9090
            required = true
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9090);
        assert!(config.gateway.required);
        assert_eq!(config.gateway.connect_attempts, 5);
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let rpc = RpcConfig {
            host: "::1".into(),
            port: 50051,
            use_tls: false,
        };
        assert_eq!(rpc.address(), "[::1]:50051");
    }
}
