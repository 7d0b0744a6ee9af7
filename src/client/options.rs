//! Dial and call configuration.
//!
//! Both structs are plain data with documented defaults. Builder methods
//! assign a single field, so when the same option is set twice the last
//! assignment wins.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::client::CallWrapper;
use crate::config::{ClientConfig, RuntimeConfig, ServerTargetConfig};
use crate::resilience::{retry_always, BreakerSettings, BreakerWrapper, ReplenishPolicy, RetryFn};

pub const DEFAULT_POOL_SIZE: usize = 2;
pub const DEFAULT_POOL_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: usize = 1;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Where and how to reach one logical server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    /// `tcp`, `tcp4`, `tcp6` or `unix`.
    pub network: String,
    pub address: String,
    /// CA certificate (PEM) used to verify the server.
    pub cert_file: Option<PathBuf>,
    /// Name the server certificate must be valid for.
    pub tls_server_name: Option<String>,
}

impl ServerTarget {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: "tcp".to_string(),
            address: address.into(),
            cert_file: None,
            tls_server_name: None,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: "unix".to_string(),
            ..Self::tcp(path)
        }
    }

    pub fn with_tls(mut self, cert_file: impl Into<PathBuf>, server_name: impl Into<String>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.tls_server_name = Some(server_name.into());
        self
    }

    /// TLS is used only when both the CA file and the server name are set.
    pub fn is_tls(&self) -> bool {
        self.cert_file.is_some() && self.tls_server_name.is_some()
    }
}

impl From<&ServerTargetConfig> for ServerTarget {
    fn from(config: &ServerTargetConfig) -> Self {
        Self {
            network: config.network.clone(),
            address: config.address.clone(),
            cert_file: config.cert_file.as_ref().map(PathBuf::from),
            tls_server_name: config.tls_server_name.clone(),
        }
    }
}

/// Per-call behaviour. Clients hold defaults; each call may override a copy.
#[derive(Clone)]
pub struct CallOptions {
    /// Applied outermost-first.
    pub wrappers: Vec<Arc<dyn CallWrapper>>,
    pub retry: RetryFn,
    /// Maximum attempts per call.
    pub retries: usize,
    pub request_timeout: Duration,
}

impl CallOptions {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryFn) -> Self {
        self.retry = retry;
        self
    }

    /// Append a wrapper after those already registered.
    pub fn with_wrapper(mut self, wrapper: impl CallWrapper) -> Self {
        self.wrappers.push(Arc::new(wrapper));
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            wrappers: Vec::new(),
            retry: retry_always(),
            retries: DEFAULT_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("wrappers", &self.wrappers.len())
            .field("retries", &self.retries)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Client construction options.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub servers: HashMap<String, ServerTarget>,
    pub pool_size: usize,
    pub pool_ttl: Duration,
    /// Bound on dialing a connection and on waiting for a pooled one.
    pub connect_timeout: Duration,
    pub replenish: ReplenishPolicy,
    pub call_options: CallOptions,
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut opts = Self::new()
            .with_pool_size(config.pool_size)
            .with_pool_ttl(Duration::from_secs(config.pool_ttl_secs))
            .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .with_retries(config.retries)
            .with_request_timeout(Duration::from_millis(config.request_timeout_ms));
        for (name, target) in &config.servers {
            opts = opts.with_server(name.clone(), ServerTarget::from(target));
        }
        opts
    }

    /// Client settings from `[client]`, with every call guarded by per-server
    /// breakers built from `[breaker]`.
    pub fn from_runtime_config(config: &RuntimeConfig) -> Self {
        Self::from_config(&config.client)
            .with_call_wrapper(BreakerWrapper::new(BreakerSettings::from_config(&config.breaker)))
    }

    pub fn with_server(mut self, name: impl Into<String>, target: ServerTarget) -> Self {
        self.servers.insert(name.into(), target);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_pool_ttl(mut self, ttl: Duration) -> Self {
        self.pool_ttl = ttl;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_replenish_policy(mut self, policy: ReplenishPolicy) -> Self {
        self.replenish = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.call_options.request_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.call_options.retries = retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryFn) -> Self {
        self.call_options.retry = retry;
        self
    }

    pub fn with_call_wrapper(mut self, wrapper: impl CallWrapper) -> Self {
        self.call_options.wrappers.push(Arc::new(wrapper));
        self
    }
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            pool_size: DEFAULT_POOL_SIZE,
            pool_ttl: DEFAULT_POOL_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            replenish: ReplenishPolicy::default(),
            call_options: CallOptions::default(),
        }
    }
}
