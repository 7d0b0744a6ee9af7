//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_client_calls_total` (counter): calls by service, method, outcome
//! - `rpc_client_call_duration_seconds` (histogram): attempt latency, recorded by [`TimingWrapper`]
//! - `rpc_server_requests_total` (counter): requests by method, outcome
//! - `rpc_server_request_duration_seconds` (histogram): handler latency
//! - `rpc_server_active_connections` (gauge): open server connections
//! - `rpc_pool_connections` (gauge): live pooled connections per server
//! - `rpc_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::time::Instant;

use crate::client::{CallFn, CallWrapper};
use crate::resilience::State;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_client_call(service: &str, method: &str, outcome: &'static str) {
    ::metrics::counter!(
        "rpc_client_calls_total",
        "service" => service.to_owned(),
        "method" => method.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_call_duration(service: &str, method: &str, elapsed: Duration) {
    ::metrics::histogram!(
        "rpc_client_call_duration_seconds",
        "service" => service.to_owned(),
        "method" => method.to_owned()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_server_request(method: &str, outcome: &'static str, started: Instant) {
    ::metrics::counter!("rpc_server_requests_total", "method" => method.to_owned(), "outcome" => outcome).increment(1);
    ::metrics::histogram!("rpc_server_request_duration_seconds", "method" => method.to_owned())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_active_connections(active: u64) {
    ::metrics::gauge!("rpc_server_active_connections").set(active as f64);
}

pub fn record_pool_connections(server: &str, live: usize) {
    ::metrics::gauge!("rpc_pool_connections", "server" => server.to_owned()).set(live as f64);
}

pub fn record_breaker_state(name: &str, state: State) {
    ::metrics::gauge!("rpc_breaker_state", "name" => name.to_owned()).set(state.as_gauge());
}

/// Call wrapper recording the latency of every attempt it wraps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingWrapper;

impl CallWrapper for TimingWrapper {
    fn wrap(&self, next: CallFn) -> CallFn {
        Arc::new(move |ctx, req, opts| {
            let (service, method) = (req.service().to_owned(), req.method().to_owned());
            let attempt = next(ctx, req, opts);
            Box::pin(async move {
                let started = Instant::now();
                let result = attempt.await;
                record_call_duration(&service, &method, started.elapsed());
                result
            })
        })
    }
}
