//! RPC server subsystem.
//!
//! # Data Flow
//! ```text
//! TcpListener (optional TLS acceptor)
//!     → rpc_server.rs (accept loop, one task per connection)
//!     → connection.rs (read frames, one task per request)
//!     → handler.rs (handler wrappers, first registered outermost)
//!     → registry.rs (Service.Method lookup) → service.rs (typed handler)
//!     → response frame, same sequence number
//! ```
//!
//! # Design Decisions
//! - No admission control: connections and in-flight requests are unbounded
//! - The registry is swapped atomically on registration and read without locks
//! - Handler panics are contained per request and answered with a 500
//! - Accept errors are logged; the loop keeps running

pub mod connection;
pub mod handler;
pub mod health;
pub mod options;
pub mod registry;
pub mod rpc_server;
pub mod service;

pub use handler::{chain, HandlerFn, HandlerFuture, HandlerWrapper, ServerRequest};
pub use health::health_service;
pub use options::{ServerOptions, TlsFiles};
pub use registry::{MethodRegistry, Registry};
pub use rpc_server::{resolve_address, RpcServer};
pub use service::Service;
