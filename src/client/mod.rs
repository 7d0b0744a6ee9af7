//! RPC client subsystem.
//!
//! # Data Flow
//! ```text
//! RpcClient::call(ctx, Request)
//!     → options.rs (defaults + per-call overrides)
//!     → wrapper.rs (call wrappers, first registered outermost)
//!     → rpc_client.rs (deadline, attempt loop, retry predicate)
//!     → pool (one per logical server)
//!     → connection.rs (framed request / response on one stream)
//! ```
//!
//! # Design Decisions
//! - Every attempt runs in its own task and is aborted once the call gives up
//! - A connection is flagged failed while a request is in flight, so an
//!   aborted attempt never hands a half-used stream back to the pool
//! - Client defaults are immutable; per-call overrides work on a copy

pub mod connection;
pub mod options;
pub mod request;
pub mod rpc_client;
pub mod wrapper;

pub use connection::RpcConnection;
pub use options::{CallOptions, DialOptions, ServerTarget};
pub use request::{Request, CONTENT_TYPE_HEADER, REQUEST_ID_HEADER};
pub use rpc_client::RpcClient;
pub use wrapper::{chain, CallFn, CallFuture, CallWrapper};
