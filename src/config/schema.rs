//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! section and field has a default, so an empty file is a valid config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the RPC runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Listener settings for the server binary.
    pub server: ServerConfig,

    /// Pools, timeouts and targets for outbound calls. Read by `rpc-cli` and
    /// by applications embedding the client, not by the server binary.
    pub client: ClientConfig,

    /// Settings shared by every client-side circuit breaker.
    pub breaker: BreakerConfig,

    pub observability: ObservabilityConfig,
}

/// Server listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8080" or ":8080"). Unset falls back to `port_env`.
    pub address: Option<String>,

    /// Environment variable holding the port when no address is set.
    pub port_env: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port_env: "PORT".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connections kept per server.
    pub pool_size: usize,

    /// Maximum connection age in seconds.
    pub pool_ttl_secs: u64,

    /// Dial and pool checkout timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Attempts per call.
    pub retries: usize,

    /// Per-call timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Logical server name -> target.
    pub servers: HashMap<String, ServerTargetConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            pool_ttl_secs: 600,
            connect_timeout_secs: 30,
            retries: 1,
            request_timeout_ms: 3000,
            servers: HashMap::new(),
        }
    }
}

/// Where one logical server lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerTargetConfig {
    /// `tcp`, `tcp4`, `tcp6` or `unix` (default: `tcp`).
    #[serde(default = "default_network")]
    pub network: String,

    /// Host and port, or a socket path for `unix`.
    pub address: String,

    /// CA certificate (PEM). TLS is enabled when this and `tls_server_name` are set.
    pub cert_file: Option<String>,

    pub tls_server_name: Option<String>,
}

fn default_network() -> String {
    "tcp".to_string()
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Trial requests admitted while half-open.
    pub max_requests: u32,

    /// Seconds the breaker stays open before probing.
    pub timeout_secs: u64,

    /// Trip once consecutive failures exceed this count.
    pub consecutive_failures: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            timeout_secs: 60,
            consecutive_failures: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Address for the scrape endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
