//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound (client pools):
//!     → dial.rs (tcp / tcp4 / tcp6 / unix, connect timeout)
//!     → tls.rs (optional handshake against a configured CA)
//!
//! Inbound (server):
//!     → tls.rs (optional acceptor)
//!     → connection.rs (lifecycle tracking for graceful shutdown)
//! ```
//!
//! # Design Decisions
//! - Streams are boxed behind one `Transport` trait so TLS and plain sockets share code
//! - TLS uses the ring provider explicitly instead of a process-wide default
//! - Each accepted connection is tracked until its last response is written

pub mod connection;
pub mod dial;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use dial::{BoxedTransport, Dialer, Transport};
