//! Length-delimited framing of messages on a byte stream.
//!
//! # Wire format
//! ```text
//! [u32 BE payload_len] [u32 BE envelope_len] [JSON envelope] [body bytes]
//! ```
//! The envelope holds the sequence number, the `Service.Method` name, the
//! header map and, on responses, an optional error. The body is copied
//! verbatim, so its bytes survive the trip unchanged whatever codec produced them.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RpcError, WireError};
use crate::message::Header;

/// Largest payload accepted from the wire.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const FRAME_ID: &str = "micro_rpc.message.frame";

/// Unit exchanged between client and server: header map plus opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

/// One request or response on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlates a response with its request on the same connection.
    pub seq: u64,
    /// Fully-qualified `Service.Method`.
    pub service_method: String,
    pub message: Message,
    /// Set on responses whose handler failed; the body is empty then.
    pub error: Option<WireError>,
}

impl Frame {
    pub fn request(seq: u64, service_method: impl Into<String>, message: Message) -> Self {
        Self { seq, service_method: service_method.into(), message, error: None }
    }

    pub fn response(seq: u64, service_method: impl Into<String>, result: Result<Message, WireError>) -> Self {
        let (message, error) = match result {
            Ok(message) => (message, None),
            Err(err) => (Message::default(), Some(err)),
        };
        Self { seq, service_method: service_method.into(), message, error }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    seq: u64,
    service_method: String,
    #[serde(default)]
    header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

/// Serialize a frame including its length prefix.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, RpcError> {
    let envelope = Envelope {
        seq: frame.seq,
        service_method: frame.service_method.clone(),
        header: frame.message.header.clone(),
        error: frame.error.clone(),
    };
    let envelope = serde_json::to_vec(&envelope)
        .map_err(|e| RpcError::internal(FRAME_ID, format!("encode envelope: {e}")))?;

    let payload_len = 4 + envelope.len() + frame.message.body.len();
    if payload_len > MAX_FRAME_SIZE {
        return Err(RpcError::internal(
            FRAME_ID,
            format!("frame of {payload_len} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        ));
    }

    let mut out = Vec::with_capacity(4 + payload_len);
    out.extend_from_slice(&(payload_len as u32).to_be_bytes());
    out.extend_from_slice(&(envelope.len() as u32).to_be_bytes());
    out.extend_from_slice(&envelope);
    out.extend_from_slice(&frame.message.body);
    Ok(out)
}

/// Parse a payload (everything after the outer length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Frame, RpcError> {
    if payload.len() < 4 {
        return Err(RpcError::internal(FRAME_ID, "truncated frame"));
    }
    let (len_bytes, rest) = payload.split_at(4);
    let envelope_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if envelope_len > rest.len() {
        return Err(RpcError::internal(
            FRAME_ID,
            format!("envelope length {envelope_len} exceeds payload of {}", rest.len()),
        ));
    }
    let (envelope, body) = rest.split_at(envelope_len);
    let envelope: Envelope = serde_json::from_slice(envelope)
        .map_err(|e| RpcError::internal(FRAME_ID, format!("decode envelope: {e}")))?;

    Ok(Frame {
        seq: envelope.seq,
        service_method: envelope.service_method,
        message: Message::new(envelope.header, body.to_vec()),
        error: envelope.error,
    })
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await.map_err(|e| io_error("write frame", e))?;
    writer.flush().await.map_err(|e| io_error("flush frame", e))
}

/// Read one frame. Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf[..1]).await.map_err(|e| io_error("read length", e))?;
    if n == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut len_buf[1..])
        .await
        .map_err(|e| io_error("read length", e))?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::internal(
            FRAME_ID,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_SIZE}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| io_error("read payload", e))?;
    decode_payload(&payload).map(Some)
}

fn io_error(action: &str, err: std::io::Error) -> RpcError {
    RpcError::internal(FRAME_ID, format!("{action}: {err}"))
}
