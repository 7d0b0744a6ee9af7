//! Logical request built by callers.

use serde::Serialize;
use uuid::Uuid;

use crate::error::RpcError;
use crate::message::{Codec, Header, JsonCodec};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// A call addressed to a logical server.
///
/// `service` selects the connection pool; `method` is the fully-qualified
/// `Service.Method` name registered on the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    service: String,
    method: String,
    header: Header,
    body: Vec<u8>,
}

impl Request {
    /// Build a request with a JSON body.
    pub fn new<T>(service: impl Into<String>, method: impl Into<String>, body: &T) -> Result<Self, RpcError>
    where
        T: Serialize + ?Sized,
    {
        Self::with_codec(&JsonCodec, service, method, body)
    }

    /// Build a request whose body is encoded by `codec`.
    pub fn with_codec<C, T>(
        codec: &C,
        service: impl Into<String>,
        method: impl Into<String>,
        body: &T,
    ) -> Result<Self, RpcError>
    where
        C: Codec,
        T: Serialize + ?Sized,
    {
        let mut request = Self::raw(service, method, codec.encode(body)?);
        request.header.set(CONTENT_TYPE_HEADER, codec.content_type());
        Ok(request)
    }

    /// Build a request around already-encoded bytes.
    pub fn raw(service: impl Into<String>, method: impl Into<String>, body: Vec<u8>) -> Self {
        let mut header = Header::new();
        header.set(REQUEST_ID_HEADER, Uuid::new_v4().to_string());
        Self {
            service: service.into(),
            method: method.into(),
            header,
            body,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Value of the `X-Request-Id` header.
    pub fn request_id(&self) -> Option<&str> {
        self.header.get(REQUEST_ID_HEADER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_stamps_metadata() {
        let req = Request::new("arith", "Arith.Add", &[1, 2]).unwrap();
        assert_eq!(req.service(), "arith");
        assert_eq!(req.method(), "Arith.Add");
        assert_eq!(req.body(), b"[1,2]");
        assert_eq!(req.header().get("content-type"), Some("application/json"));
        let id = req.request_id().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = Request::raw("s", "S.M", Vec::new());
        let b = Request::raw("s", "S.M", Vec::new());
        assert_ne!(a.request_id(), b.request_id());
    }
}
