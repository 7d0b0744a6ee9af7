//! Server configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::server::HandlerWrapper;

pub const DEFAULT_PORT_ENV: &str = "PORT";
pub const DEFAULT_PORT: u16 = 8080;

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Server construction options. Builder methods follow last-write-wins.
#[derive(Clone)]
pub struct ServerOptions {
    pub tls: Option<TlsFiles>,
    /// Applied outermost-first.
    pub wrappers: Vec<Arc<dyn HandlerWrapper>>,
    /// Environment variable consulted for the port when no address is given.
    pub port_env: String,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let mut opts = Self::new().with_port_env(config.port_env.clone());
        if let Some(tls) = &config.tls {
            opts = opts.with_tls(&tls.cert_path, &tls.key_path);
        }
        opts
    }

    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsFiles {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    pub fn with_wrapper(mut self, wrapper: impl HandlerWrapper) -> Self {
        self.wrappers.push(Arc::new(wrapper));
        self
    }

    pub fn with_port_env(mut self, name: impl Into<String>) -> Self {
        self.port_env = name.into();
        self
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tls: None,
            wrappers: Vec::new(),
            port_env: DEFAULT_PORT_ENV.to_string(),
        }
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("tls", &self.tls)
            .field("wrappers", &self.wrappers.len())
            .field("port_env", &self.port_env)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, TlsConfig};

    #[test]
    fn built_from_config() {
        let config = ServerConfig {
            address: None,
            port_env: "RPC_PORT".into(),
            tls: Some(TlsConfig {
                cert_path: "server.pem".into(),
                key_path: "server.key".into(),
            }),
        };
        let opts = ServerOptions::from_config(&config);
        assert_eq!(opts.port_env, "RPC_PORT");
        assert_eq!(opts.tls.unwrap().key_path, PathBuf::from("server.key"));
        assert!(ServerOptions::from_config(&ServerConfig::default()).tls.is_none());
    }
}
