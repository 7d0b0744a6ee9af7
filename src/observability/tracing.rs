//! Trace propagation wrappers.
//!
//! The client wrapper opens an `rpc.call` span and makes sure the outgoing
//! request carries an `X-Trace-Id`, reusing the caller's id when the context
//! already has one. The handler wrapper reads it back into the handler's
//! span and context, so calls made from a handler continue the same trace.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::client::{CallFn, CallWrapper};
use crate::server::{HandlerFn, HandlerWrapper, ServerRequest};

pub const TRACE_HEADER: &str = "X-Trace-Id";

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Client-side trace propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCallWrapper;

impl CallWrapper for TraceCallWrapper {
    fn wrap(&self, next: CallFn) -> CallFn {
        Arc::new(move |ctx, mut req, opts| {
            let trace_id = req
                .header()
                .get(TRACE_HEADER)
                .or_else(|| ctx.metadata().get(TRACE_HEADER))
                .map_or_else(new_trace_id, str::to_owned);
            req.header_mut().set(TRACE_HEADER, trace_id.as_str());
            let span = tracing::info_span!(
                "rpc.call",
                service = %req.service(),
                method = %req.method(),
                trace_id = %trace_id
            );
            Box::pin(next(ctx, req, opts).instrument(span))
        })
    }
}

/// Server-side trace extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceHandlerWrapper;

impl HandlerWrapper for TraceHandlerWrapper {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |mut ctx, req: ServerRequest| {
            let trace_id = req
                .header
                .get(TRACE_HEADER)
                .map_or_else(new_trace_id, str::to_owned);
            ctx.metadata_mut().set(TRACE_HEADER, trace_id.as_str());
            let span = tracing::info_span!(
                "rpc.handle",
                method = %req.service_method,
                request_id = req.request_id().unwrap_or("-"),
                trace_id = %trace_id
            );
            Box::pin(next(ctx, req).instrument(span))
        })
    }
}
