//! Error taxonomy shared by the client, the server and the resilience layer.
//!
//! Every failure that crosses the client boundary is one of the variants of
//! [`RpcError`]. Breaker and pool failures keep their own enums so they can be
//! matched on directly, and fold into [`RpcError`] through `From`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections produced by a circuit breaker before the request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerError {
    /// The breaker is open; the request was not attempted.
    #[error("circuit breaker is open")]
    OpenState,
    /// The breaker is half-open and its trial quota is used up.
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,
}

/// Connection pool failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The configured pool size is zero.
    #[error("pool size must be positive")]
    PoolSize,
    /// No connection factory was supplied to the pool.
    #[error("pool has no connection factory")]
    CreateConnHandleNotExist,
    /// The deadline elapsed while waiting for an idle connection.
    #[error("timed out waiting for a pooled connection")]
    PoolGetTimeout,
}

/// Status codes carried by classified errors, on the wire and in logs.
pub mod code {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const TIMEOUT: u16 = 408;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// Errors surfaced by the RPC runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error(transparent)]
    Breaker(#[from] BreakerError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No pool is configured for the logical server.
    #[error("server {0} is not configured")]
    NotServer(String),

    /// Target unreachable or method unknown.
    #[error("{id}: {detail}")]
    NotFound { id: String, detail: String },

    /// The overall call deadline elapsed.
    #[error("{id}: {detail}")]
    Timeout { id: String, detail: String },

    /// The request could not be decoded by the receiving side.
    #[error("{id}: {detail}")]
    BadRequest { id: String, detail: String },

    /// Transport, dial or framing failure.
    #[error("{id}: {detail}")]
    InternalServerError { id: String, detail: String },

    /// An error returned by a remote handler with a code outside the taxonomy.
    #[error("{id}: {detail} (code {code})")]
    Remote { id: String, code: u16, detail: String },
}

impl RpcError {
    pub fn not_found(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotFound { id: id.into(), detail: detail.into() }
    }

    pub fn timeout(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Timeout { id: id.into(), detail: detail.into() }
    }

    pub fn bad_request(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest { id: id.into(), detail: detail.into() }
    }

    pub fn internal(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InternalServerError { id: id.into(), detail: detail.into() }
    }

    /// Numeric status code of this error.
    pub fn code(&self) -> u16 {
        match self {
            RpcError::Breaker(_) | RpcError::Pool(_) | RpcError::InternalServerError { .. } => {
                code::INTERNAL_SERVER_ERROR
            }
            RpcError::NotServer(_) | RpcError::NotFound { .. } => code::NOT_FOUND,
            RpcError::Timeout { .. } => code::TIMEOUT,
            RpcError::BadRequest { .. } => code::BAD_REQUEST,
            RpcError::Remote { code, .. } => *code,
        }
    }

    /// True for failures of the transport or the remote host rather than of the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. }
                | RpcError::InternalServerError { .. }
                | RpcError::NotFound { .. }
                | RpcError::Pool(PoolError::PoolGetTimeout)
        )
    }

    /// Convert into the form sent back to a client.
    pub fn to_wire(&self) -> WireError {
        let (id, detail) = match self {
            RpcError::NotFound { id, detail }
            | RpcError::Timeout { id, detail }
            | RpcError::BadRequest { id, detail }
            | RpcError::InternalServerError { id, detail }
            | RpcError::Remote { id, detail, .. } => (id.clone(), detail.clone()),
            other => ("micro_rpc".to_string(), other.to_string()),
        };
        WireError { id, code: self.code(), detail }
    }

    /// Rebuild a classified error from its wire form.
    pub fn from_wire(wire: WireError) -> Self {
        let WireError { id, code, detail } = wire;
        match code {
            code::NOT_FOUND => RpcError::NotFound { id, detail },
            code::TIMEOUT => RpcError::Timeout { id, detail },
            code::BAD_REQUEST => RpcError::BadRequest { id, detail },
            code::INTERNAL_SERVER_ERROR => RpcError::InternalServerError { id, detail },
            code => RpcError::Remote { id, code, detail },
        }
    }
}

/// Server setup and registration failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// More than one listen address was supplied.
    #[error("too many listen addresses: {0}")]
    TooManyAddresses(usize),

    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The certificate or key could not be loaded.
    #[error("TLS configuration: {0}")]
    Tls(#[source] std::io::Error),

    #[error("service {0} is already registered")]
    DuplicateService(String),

    #[error("service {0} has no methods")]
    NoMethods(String),

    #[error("invalid service name {0:?}")]
    InvalidServiceName(String),
}

/// Error payload of a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub id: String,
    pub code: u16,
    pub detail: String,
}
