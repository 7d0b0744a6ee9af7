//! Server-side handler middleware.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::client::REQUEST_ID_HEADER;
use crate::context::Context;
use crate::error::RpcError;
use crate::message::{Header, Message};

/// A decoded request as seen by handlers and handler wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequest {
    /// Fully-qualified `Service.Method`.
    pub service_method: String,
    pub header: Header,
    pub body: Vec<u8>,
}

impl ServerRequest {
    pub fn new(service_method: impl Into<String>, header: Header, body: Vec<u8>) -> Self {
        Self {
            service_method: service_method.into(),
            header,
            body,
        }
    }

    /// Service part of the name, before the last dot.
    pub fn service(&self) -> &str {
        self.service_method
            .rsplit_once('.')
            .map_or(self.service_method.as_str(), |(service, _)| service)
    }

    /// Method part of the name, after the last dot.
    pub fn method(&self) -> &str {
        self.service_method
            .rsplit_once('.')
            .map_or("", |(_, method)| method)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header.get(REQUEST_ID_HEADER)
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Message, RpcError>>;

/// Executes one request.
pub type HandlerFn = Arc<dyn Fn(Context, ServerRequest) -> HandlerFuture + Send + Sync>;

/// Decorates request execution, symmetric to [`CallWrapper`](crate::client::CallWrapper).
pub trait HandlerWrapper: Send + Sync + 'static {
    fn wrap(&self, next: HandlerFn) -> HandlerFn;
}

impl<F> HandlerWrapper for F
where
    F: Fn(HandlerFn) -> HandlerFn + Send + Sync + 'static,
{
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        self(next)
    }
}

/// Compose `wrappers` around `inner`; the first wrapper ends up outermost.
pub fn chain(wrappers: &[Arc<dyn HandlerWrapper>], inner: HandlerFn) -> HandlerFn {
    wrappers.iter().rev().fold(inner, |next, wrapper| wrapper.wrap(next))
}
