//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGINT / SIGTERM (signals.rs)
//!     → Shutdown::trigger()
//!     → RpcServer::serve stops accepting, connections stop reading
//!     → Pool replenishment tasks exit
//!     → Client calls carrying the signal in their Context abort their wait
//! ```
//!
//! # Design Decisions
//! - One primitive for shutdown and per-call cancellation
//! - Server connections finish their in-flight requests before `serve` returns

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::spawn_signal_handler;
