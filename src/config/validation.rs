//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes and timeouts > 0)
//! - Reject half-configured TLS and unknown networks
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

const NETWORKS: [&str; 4] = ["tcp", "tcp4", "tcp6", "unix"];

/// A single semantic problem in the configuration.
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

/// Check every semantic rule and report all violations.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let client = &config.client;
    if client.pool_size == 0 {
        errors.push(ValidationError::new("client.pool_size", "must be positive"));
    }
    if client.retries == 0 {
        errors.push(ValidationError::new("client.retries", "must be at least 1"));
    }
    for (field, value) in [
        ("client.pool_ttl_secs", client.pool_ttl_secs),
        ("client.connect_timeout_secs", client.connect_timeout_secs),
        ("client.request_timeout_ms", client.request_timeout_ms),
        ("breaker.timeout_secs", config.breaker.timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be positive"));
        }
    }
    if config.breaker.max_requests == 0 {
        errors.push(ValidationError::new("breaker.max_requests", "must be positive"));
    }

    let mut names: Vec<&String> = client.servers.keys().collect();
    names.sort();
    for name in names {
        let target = &client.servers[name];
        let field = format!("client.servers.{name}");
        if target.address.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.address"), "must not be empty"));
        }
        if !NETWORKS.contains(&target.network.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.network"),
                format!("unknown network {:?}, expected one of {}", target.network, NETWORKS.join(", ")),
            ));
        }
        if target.cert_file.is_some() != target.tls_server_name.is_some() {
            errors.push(ValidationError::new(
                field,
                "cert_file and tls_server_name must be set together",
            ));
        }
    }

    if let Some(tls) = &config.server.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new("server.tls", "cert_path and key_path are both required"));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address {:?}", observability.metrics_address),
        ));
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
    use crate::config::schema::{ServerTargetConfig, TlsConfig};

    fn target(network: &str, address: &str) -> ServerTargetConfig {
        ServerTargetConfig {
            network: network.to_string(),
            address: address.to_string(),
            cert_file: None,
            tls_server_name: None,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&RuntimeConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = RuntimeConfig::default();
        config.client.pool_size = 0;
        config.client.retries = 0;
        config.client.request_timeout_ms = 0;
        config.client.servers.insert("a".into(), target("udp", ""));
        let mut half_tls = target("tcp", "127.0.0.1:1");
        half_tls.cert_file = Some("ca.pem".into());
        config.client.servers.insert("b".into(), half_tls);
        config.server.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: String::new(),
        });

        let fields: Vec<String> = validate_config(&config).unwrap_err().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "client.pool_size",
                "client.retries",
                "client.request_timeout_ms",
                "client.servers.a.address",
                "client.servers.a.network",
                "client.servers.b",
                "server.tls",
            ]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = RuntimeConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());
        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
