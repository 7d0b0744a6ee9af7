//! Body serialization contract.
//!
//! The frame layer treats bodies as opaque bytes; call sites pick a [`Codec`]
//! to turn typed arguments and replies into those bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RpcError;

/// Serialization used for message bodies.
pub trait Codec: Send + Sync + 'static {
    /// Value recorded in the `Content-Type` header of encoded requests.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, RpcError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, RpcError>;
}

/// JSON bodies via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(value)
            .map_err(|e| RpcError::bad_request("micro_rpc.codec.json", format!("encode body: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, RpcError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RpcError::bad_request("micro_rpc.codec.json", format!("decode body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Args {
        a: i64,
        b: i64,
    }

    #[test]
    fn json_codec_decodes_what_it_encodes() {
        let codec = JsonCodec;
        let bytes = codec.encode(&Args { a: 1, b: 2 }).unwrap();
        assert_eq!(bytes, br#"{"a":1,"b":2}"#);
        let args: Args = codec.decode(&bytes).unwrap();
        assert_eq!(args, Args { a: 1, b: 2 });
    }

    #[test]
    fn json_decode_failure_is_bad_request() {
        let err = JsonCodec.decode::<Args>(b"not json").unwrap_err();
        assert!(matches!(err, RpcError::BadRequest { .. }));
    }
}
