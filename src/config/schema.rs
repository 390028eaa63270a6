//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind addresses, connection limit).
    pub listener: ListenerConfig,

    /// Optional TLS identity. When absent and HTTPS is enabled a self-signed
    /// localhost certificate is generated.
    pub tls: Option<TlsConfig>,

    /// Request head limits.
    pub limits: LimitsConfig,

    /// Worker pool for blocking handler work.
    pub workers: WorkerConfig,

    /// Static resource mounts served by the binary.
    pub resources: Vec<ResourceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:8080"). `None` disables HTTP.
    pub http_address: Option<String>,

    /// HTTPS bind address. `None` disables HTTPS.
    pub https_address: Option<String>,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// Seconds to wait for in-flight connections when stopping.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: Some("127.0.0.1:8080".to_string()),
            https_address: None,
            max_connections: 10_000,
            drain_timeout_secs: 5,
        }
    }
}

/// TLS configuration for the HTTPS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Reload the identity when either file changes.
    #[serde(default)]
    pub watch: bool,
}

/// Limits applied to the request head before dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum combined size of all header lines in bytes (431 above).
    pub max_headers_size: usize,

    /// Maximum request-target length in bytes (414 above).
    pub max_url_size: usize,

    /// Number of body events buffered per connection while a handler is busy.
    pub body_queue_depth: usize,
}

/// Length of the method and protocol tokens on a request line, e.g. "OPTIONS HTTP/1.1 ".
const LENGTH_OF_METHOD_AND_PROTOCOL: usize = 17;

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_headers_size: 8192,
            max_url_size: 8192 - LENGTH_OF_METHOD_AND_PROTOCOL,
            body_queue_depth: 16,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of blocking handler tasks running at once.
    pub max_blocking: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_blocking: 64 }
    }
}

/// A static resource mount.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
    /// URL prefix the resources are served under.
    #[serde(default = "default_mount")]
    pub mount: String,

    /// Directory on disk holding the resources.
    pub directory: String,

    /// File served for requests ending in `/`.
    #[serde(default = "default_file")]
    pub default_file: Option<String>,
}

fn default_mount() -> String {
    "/".to_string()
}

fn default_file() -> Option<String> {
    Some("index.html".to_string())
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter (trace, debug, info, warn, error or a full directive).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.http_address.as_deref(), Some("127.0.0.1:8080"));
        assert!(config.listener.https_address.is_none());
        assert_eq!(config.limits.max_headers_size, 8192);
        assert_eq!(config.limits.max_url_size, 8175);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn resource_defaults_apply() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[resources]]
            directory = "public"
            "#,
        )
        .unwrap();
        assert_eq!(config.resources[0].mount, "/");
        assert_eq!(config.resources[0].default_file.as_deref(), Some("index.html"));
    }
}
