//! Connection pooling subsystem.
//!
//! # Responsibilities
//! - Keep a bounded set of warm connections per logical server
//! - Evict connections past their time-to-live
//! - Replace failed connections in the background
//!
//! # Design Decisions
//! - Checkout returns an RAII guard; dropping it is the only way back into the pool
//! - Waiting for a connection is bounded by the caller's deadline
//! - Replacement creation is bounded and stops when the pool closes

pub mod connection_pool;
pub mod manager;

pub use connection_pool::{CreateConnection, Pool, PoolConnection, PoolOptions, PooledConnection};
pub use manager::PoolManager;
