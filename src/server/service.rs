//! Typed service definitions.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::CONTENT_TYPE_HEADER;
use crate::context::Context;
use crate::error::RpcError;
use crate::message::{Codec, Header, JsonCodec, Message};
use crate::server::{HandlerFn, ServerRequest};

/// A named group of methods registered on a server as `Service.Method`.
///
/// ```ignore
/// let arith = Service::new("Arith")
///     .method("Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
/// server.register(arith)?;
/// ```
#[derive(Clone)]
pub struct Service {
    name: String,
    methods: BTreeMap<String, HandlerFn>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Add a method taking and returning JSON-encoded values.
    ///
    /// Arguments that fail to decode are answered with `BadRequest` without
    /// running the handler.
    pub fn method<A, R, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.raw_method(name, move |ctx, req: ServerRequest| {
            let handler = handler.clone();
            async move {
                let codec = JsonCodec;
                let args: A = codec.decode(&req.body).map_err(|err| {
                    RpcError::bad_request(req.service_method.clone(), format!("{}: {err}", req.service_method))
                })?;
                let reply = handler(ctx, args).await?;
                let mut header = Header::new();
                header.set(CONTENT_TYPE_HEADER, codec.content_type());
                Ok::<_, RpcError>(Message::new(header, codec.encode(&reply)?))
            }
        })
    }

    /// Add a method working on undecoded messages.
    pub fn raw_method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context, ServerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, RpcError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx, req| Box::pin(handler(ctx, req)));
        self.methods.insert(name.into(), handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub(crate) fn into_methods(self) -> BTreeMap<String, HandlerFn> {
        self.methods
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arith() -> Service {
        Service::new("Arith").method("Add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) })
    }

    #[tokio::test]
    async fn typed_method_round_trips_json() {
        let methods = arith().into_methods();
        let add = &methods["Add"];
        let reply = add(Context::background(), ServerRequest::new("Arith.Add", Header::new(), b"[2,3]".to_vec()))
            .await
            .unwrap();
        assert_eq!(reply.body, b"5");
        assert_eq!(reply.header.get("Content-Type"), Some("application/json"));
    }

    #[tokio::test]
    async fn undecodable_arguments_are_bad_requests() {
        let methods = arith().into_methods();
        let err = (methods["Add"])(
            Context::background(),
            ServerRequest::new("Arith.Add", Header::new(), b"\"nope\"".to_vec()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), 400);
        assert!(err.to_string().contains("Arith.Add"));
    }

    #[test]
    fn lists_method_names() {
        let svc = arith().method("Neg", |_ctx, a: i64| async move { Ok(-a) });
        assert_eq!(svc.method_names().collect::<Vec<_>>(), ["Add", "Neg"]);
    }
}
