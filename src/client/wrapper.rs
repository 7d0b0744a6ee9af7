//! Call middleware: wrappers decorating the per-attempt call function.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::client::{CallOptions, Request};
use crate::context::Context;
use crate::error::RpcError;
use crate::message::Message;

pub type CallFuture = BoxFuture<'static, Result<Message, RpcError>>;

/// Executes one attempt of a call.
pub type CallFn = Arc<dyn Fn(Context, Request, CallOptions) -> CallFuture + Send + Sync>;

/// Decorates a call function with a cross-cutting concern.
///
/// `wrap` receives the next function in the chain and returns the function
/// that runs in its place.
pub trait CallWrapper: Send + Sync + 'static {
    fn wrap(&self, next: CallFn) -> CallFn;
}

impl<F> CallWrapper for F
where
    F: Fn(CallFn) -> CallFn + Send + Sync + 'static,
{
    fn wrap(&self, next: CallFn) -> CallFn {
        self(next)
    }
}

/// Compose `wrappers` around `inner`; the first wrapper ends up outermost.
pub fn chain(wrappers: &[Arc<dyn CallWrapper>], inner: CallFn) -> CallFn {
    wrappers.iter().rev().fold(inner, |next, wrapper| wrapper.wrap(next))
}
