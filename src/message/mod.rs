//! Wire message subsystem.
//!
//! # Data Flow
//! ```text
//! typed argument
//!     → codec.rs (Codec::encode, JSON by default)
//!     → Message { header, body }
//!     → frame.rs (envelope + body, length prefixed)
//!     → transport stream
//! ```
//!
//! # Design Decisions
//! - Header travels in the envelope, independent of the body encoding
//! - Body bytes are never re-encoded by the frame layer
//! - Clean EOF between frames is a normal connection close, not an error

pub mod codec;
pub mod frame;
pub mod header;

pub use codec::{Codec, JsonCodec};
pub use frame::{read_frame, write_frame, Frame, Message};
pub use header::Header;
