//! Internal RPC runtime: pooled clients with deadlines, retries and circuit
//! breakers, and a server dispatching framed calls to registered services.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod server;

pub use client::{CallOptions, DialOptions, Request, RpcClient, ServerTarget};
pub use config::RuntimeConfig;
pub use context::Context;
pub use error::{BreakerError, PoolError, RpcError, ServerError};
pub use lifecycle::Shutdown;
pub use message::{Header, Message};
pub use resilience::{BreakerSettings, CircuitBreaker};
pub use server::{RpcServer, ServerOptions, Service};
