//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check that at least one listener is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no listener enabled (set http_address or https_address)")]
    NoListener,

    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("resource mount '{0}' must start with '/'")]
    InvalidMount(String),

    #[error("resource mount '{0}' has an empty directory")]
    EmptyDirectory(String),

    #[error("tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    if listener.http_address.is_none() && listener.https_address.is_none() {
        errors.push(ValidationError::NoListener);
    }
    for (field, value) in [
        ("http_address", &listener.http_address),
        ("https_address", &listener.https_address),
    ] {
        if let Some(addr) = value {
            if addr.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::InvalidAddress {
                    field,
                    value: addr.clone(),
                });
            }
        }
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }

    let limits = &config.limits;
    if limits.max_headers_size == 0 {
        errors.push(ValidationError::Zero("limits.max_headers_size"));
    }
    if limits.max_url_size == 0 {
        errors.push(ValidationError::Zero("limits.max_url_size"));
    }
    if limits.body_queue_depth == 0 {
        errors.push(ValidationError::Zero("limits.body_queue_depth"));
    }
    if config.workers.max_blocking == 0 {
        errors.push(ValidationError::Zero("workers.max_blocking"));
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    for resource in &config.resources {
        if !resource.mount.starts_with('/') {
            errors.push(ValidationError::InvalidMount(resource.mount.clone()));
        }
        if resource.directory.trim().is_empty() {
            errors.push(ValidationError::EmptyDirectory(resource.mount.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ResourceConfig, TlsConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.http_address = None;
        config.limits.max_headers_size = 0;
        config.workers.max_blocking = 0;
        config.resources.push(ResourceConfig {
            mount: "static".into(),
            directory: "".into(),
            default_file: None,
        });
        config.tls = Some(TlsConfig {
            cert_path: "".into(),
            key_path: "key.pem".into(),
            watch: false,
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoListener));
        assert!(errors.contains(&ValidationError::Zero("limits.max_headers_size")));
        assert!(errors.contains(&ValidationError::Zero("workers.max_blocking")));
        assert!(errors.contains(&ValidationError::InvalidMount("static".into())));
        assert!(errors.contains(&ValidationError::EmptyDirectory("static".into())));
        assert!(errors.contains(&ValidationError::EmptyTlsPath("cert_path")));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn rejects_unparseable_addresses() {
        let mut config = ServerConfig::default();
        config.listener.https_address = Some("localhost".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::InvalidAddress {
                field: "https_address",
                value: "localhost".into()
            }]
        );
    }
}
