//! RPC client: per-server pools plus the call dispatch pipeline.
//!
//! # Data Flow
//! ```text
//! call(ctx, req)
//!     → default CallOptions, per-call overrides applied to a copy
//!     → resolve deadline (context deadline wins over request timeout)
//!     → chain(wrappers, raw attempt)
//!     → attempt loop:
//!           spawn attempt ─┬─ completes  → Ok: return / Err: ask retry predicate
//!                          ├─ deadline   → abort attempt, Timeout
//!                          └─ canceled   → abort attempt, Timeout
//! raw attempt:
//!     → pool.get(min(connect timeout, deadline))
//!     → RpcConnection::call
//!     → guard dropped: connection released (or discarded if poisoned)
//! ```

use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep_until, Instant};

use crate::client::wrapper::{self, CallFn};
use crate::client::{CallOptions, DialOptions, Request, RpcConnection};
use crate::context::Context;
use crate::error::{PoolError, RpcError};
use crate::message::{Codec, JsonCodec, Message};
use crate::net::Dialer;
use crate::observability::metrics;
use crate::pool::{CreateConnection, Pool, PoolManager, PoolOptions, PooledConnection};
use crate::resilience::timeouts::resolve_deadline;

const CALL_ID: &str = "micro_rpc.client.call";
const CONNECT_ID: &str = "micro_rpc.client.connect";

struct ClientInner {
    opts: DialOptions,
    pools: PoolManager<RpcConnection>,
}

/// Client for every logical server named in its [`DialOptions`]. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Build one warmed-up pool per configured server.
    ///
    /// A zero pool size is fatal. A server whose TLS material cannot be
    /// loaded is logged and skipped; calls to it fail with `NotServer`.
    pub async fn connect(opts: DialOptions) -> Result<Self, RpcError> {
        if opts.pool_size == 0 {
            return Err(PoolError::PoolSize.into());
        }

        let next_id = Arc::new(AtomicU64::new(1));
        let mut pools = PoolManager::new();
        for (name, target) in &opts.servers {
            let dialer = match Dialer::new(target.clone(), opts.connect_timeout) {
                Ok(dialer) => dialer,
                Err(err) => {
                    tracing::error!(server = %name, error = %err, "Failed to load TLS configuration, server skipped");
                    continue;
                }
            };
            let pool_opts = PoolOptions::new(name.clone(), opts.pool_size, opts.pool_ttl)
                .with_create(connection_factory(name.clone(), dialer, next_id.clone()))
                .with_replenish(opts.replenish);
            match Pool::new(pool_opts).await {
                Ok(pool) => pools.add(name.clone(), pool),
                Err(err @ RpcError::Pool(PoolError::PoolSize)) => return Err(err),
                Err(err) => {
                    tracing::warn!(server = %name, error = %err, "Failed to create connection pool, server skipped");
                }
            }
        }

        tracing::info!(servers = pools.len(), pool_size = opts.pool_size, "RPC client ready");
        Ok(Self {
            inner: Arc::new(ClientInner { opts, pools }),
        })
    }

    /// Build a JSON-encoded request for `service` / `method`.
    pub fn new_request<T>(&self, service: &str, method: &str, body: &T) -> Result<Request, RpcError>
    where
        T: Serialize + ?Sized,
    {
        Request::new(service, method, body)
    }

    /// Call with the client's default options and decode the JSON reply.
    pub async fn call<R>(&self, ctx: &Context, req: Request) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
    {
        self.call_with(ctx, req, |opts| opts).await
    }

    /// Call with options derived from the defaults by `configure`.
    ///
    /// The client's defaults are never modified.
    pub async fn call_with<R, F>(&self, ctx: &Context, req: Request, configure: F) -> Result<R, RpcError>
    where
        R: DeserializeOwned,
        F: FnOnce(CallOptions) -> CallOptions,
    {
        let opts = configure(self.default_call_options());
        let message = self.call_raw(ctx, req, opts).await?;
        JsonCodec.decode(&message.body)
    }

    /// Run the full pipeline and return the reply message undecoded.
    pub async fn call_raw(&self, ctx: &Context, req: Request, mut opts: CallOptions) -> Result<Message, RpcError> {
        let (service, method) = (req.service().to_string(), req.method().to_string());
        // Unknown servers fail before any wrapper sees the request.
        if self.pool(&service).is_none() {
            metrics::record_client_call(&service, &method, "error");
            return Err(RpcError::NotServer(service));
        }

        let deadline = resolve_deadline(ctx.deadline(), &mut opts.request_timeout, Instant::now());
        let ctx = ctx.clone().with_deadline(deadline);
        let call = wrapper::chain(&opts.wrappers, self.attempt_fn());
        let attempts = opts.retries.max(1);

        let mut last_err = None;
        for attempt in 0..attempts {
            let mut handle = tokio::spawn(call(ctx.clone(), req.clone(), opts.clone()));

            let result = tokio::select! {
                biased;
                joined = &mut handle => match joined {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
                    Err(err) => Err(RpcError::internal(CALL_ID, format!("server {service}.{method}: {err}"))),
                },
                _ = sleep_until(deadline) => {
                    handle.abort();
                    tracing::debug!(%service, %method, attempt, "Call deadline exceeded");
                    metrics::record_client_call(&service, &method, "timeout");
                    return Err(RpcError::timeout(CALL_ID, format!("server {service}.{method} timeout")));
                }
                _ = ctx.canceled() => {
                    handle.abort();
                    metrics::record_client_call(&service, &method, "canceled");
                    return Err(RpcError::timeout(CALL_ID, format!("server {service}.{method} canceled")));
                }
            };

            let err = match result {
                Ok(message) => {
                    metrics::record_client_call(&service, &method, "ok");
                    return Ok(message);
                }
                Err(err) => err,
            };
            tracing::debug!(%service, %method, attempt, error = %err, "Call attempt failed");
            match (opts.retry)(&ctx, &req, attempt, &err) {
                Ok(true) => last_err = Some(err),
                Ok(false) => {
                    metrics::record_client_call(&service, &method, "error");
                    return Err(err);
                }
                Err(abort) => {
                    metrics::record_client_call(&service, &method, "error");
                    return Err(abort);
                }
            }
        }

        metrics::record_client_call(&service, &method, "error");
        Err(last_err.unwrap_or_else(|| RpcError::internal(CALL_ID, format!("server {service}.{method}: no attempt made"))))
    }

    /// Check out a connection to `service`.
    ///
    /// Waits at most the connect timeout, and never past the context deadline.
    pub async fn new_connect(&self, ctx: &Context, service: &str) -> Result<PooledConnection<RpcConnection>, RpcError> {
        let pool = self
            .inner
            .pools
            .get(service)
            .ok_or_else(|| RpcError::NotServer(service.to_string()))?;

        let mut deadline = Instant::now() + self.inner.opts.connect_timeout;
        if let Some(ctx_deadline) = ctx.deadline() {
            deadline = deadline.min(ctx_deadline);
        }
        pool.get(deadline).await.map_err(|err| match err {
            RpcError::Pool(PoolError::PoolGetTimeout) => {
                RpcError::not_found(CONNECT_ID, format!("server {service}: not found"))
            }
            other => other,
        })
    }

    /// Pool serving `service`, if configured.
    pub fn pool(&self, service: &str) -> Option<&Pool<RpcConnection>> {
        self.inner.pools.get(service)
    }

    /// Copy of the client-wide call defaults.
    pub fn default_call_options(&self) -> CallOptions {
        self.inner.opts.call_options.clone()
    }

    /// Close every pool. In-flight calls finish on their current connection.
    pub fn close(&self) {
        self.inner.pools.close_all();
    }

    fn attempt_fn(&self) -> CallFn {
        let client = self.clone();
        Arc::new(move |ctx, req, _opts| {
            let client = client.clone();
            Box::pin(async move { client.attempt(ctx, req).await })
        })
    }

    async fn attempt(&self, ctx: Context, mut req: Request) -> Result<Message, RpcError> {
        let mut header = ctx.metadata().clone();
        header.merge(req.header());
        *req.header_mut() = header;

        let mut conn = self.new_connect(&ctx, req.service()).await?;
        conn.call(&req).await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("servers", &self.inner.pools.names().collect::<Vec<_>>())
            .field("call_options", &self.inner.opts.call_options)
            .finish()
    }
}

fn connection_factory(server: String, dialer: Dialer, next_id: Arc<AtomicU64>) -> CreateConnection<RpcConnection> {
    let dialer = Arc::new(dialer);
    Arc::new(move || {
        let (server, dialer, next_id) = (server.clone(), dialer.clone(), next_id.clone());
        Box::pin(async move {
            let stream = dialer.dial().await.map_err(|err| {
                RpcError::internal(CONNECT_ID, format!("server {server}: {err}"))
            })?;
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            Ok(RpcConnection::new(id, dialer.target().address.clone(), stream))
        })
    })
}
