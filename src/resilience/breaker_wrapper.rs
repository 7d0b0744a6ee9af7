//! Call wrapper guarding each logical service with its own circuit breaker.

use std::sync::Arc;

use dashmap::DashMap;

use crate::client::{CallFn, CallWrapper};
use crate::error::RpcError;
use crate::resilience::circuit_breaker::{BreakerSettings, CircuitBreaker, State};

/// Lazily creates one breaker per `Request::service()`, named after it.
///
/// Transport failures and remote 5xx errors trip the breaker; other handler
/// errors (bad arguments, 4xx) count as healthy responses. The client rejects
/// unconfigured servers before wrappers run, so at most one breaker exists per
/// configured server.
#[derive(Clone)]
pub struct BreakerWrapper {
    settings: BreakerSettings,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerWrapper {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Breaker for `service`, created on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.settings.clone().with_name(service))))
            .clone()
    }

    /// State of the breaker for `service`, if one was created.
    pub fn state(&self, service: &str) -> Option<State> {
        self.breakers.get(service).map(|breaker| breaker.state())
    }
}

fn counts_as_healthy(err: &RpcError) -> bool {
    match err {
        RpcError::Remote { code, .. } => *code < 500,
        other => !other.is_transient(),
    }
}

impl CallWrapper for BreakerWrapper {
    fn wrap(&self, next: CallFn) -> CallFn {
        let this = self.clone();
        Arc::new(move |ctx, req, opts| {
            let breaker = this.breaker(req.service());
            let next = next.clone();
            Box::pin(async move {
                breaker
                    .call_with_acceptable(|| next(ctx, req, opts), counts_as_healthy)
                    .await
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CallOptions, Request};
    use crate::context::Context;
    use crate::error::BreakerError;

    fn failing() -> CallFn {
        Arc::new(|_, req, _| {
            let detail = format!("server {}.{} down", req.service(), req.method());
            Box::pin(async move { Err(RpcError::internal("test", detail)) })
        })
    }

    #[tokio::test]
    async fn breakers_are_isolated_per_service() {
        let wrapper = BreakerWrapper::new(BreakerSettings::default().trip_when_consecutive_failures_exceed(1));
        let call = wrapper.wrap(failing());

        for _ in 0..2 {
            let _ = call(Context::background(), Request::raw("a", "A.Get", Vec::new()), CallOptions::default()).await;
        }
        assert_eq!(wrapper.state("a"), Some(State::Open));
        assert_eq!(wrapper.state("b"), None);

        let rejected = call(Context::background(), Request::raw("a", "A.Get", Vec::new()), CallOptions::default()).await;
        assert_eq!(rejected, Err(RpcError::Breaker(BreakerError::OpenState)));

        let other = call(Context::background(), Request::raw("b", "B.Get", Vec::new()), CallOptions::default()).await;
        assert!(matches!(other, Err(RpcError::InternalServerError { .. })));
        assert_eq!(wrapper.state("b"), Some(State::Closed));
    }

    #[test]
    fn handler_errors_do_not_trip() {
        assert!(counts_as_healthy(&RpcError::bad_request("x", "y")));
        assert!(counts_as_healthy(&RpcError::Remote { id: "x".into(), code: 409, detail: "y".into() }));
        assert!(!counts_as_healthy(&RpcError::Remote { id: "x".into(), code: 503, detail: "y".into() }));
        assert!(!counts_as_healthy(&RpcError::timeout("x", "y")));
    }
}
