//! Fixed-size pool of long-lived connections with a time-to-live.
//!
//! # Invariants
//! - `live` (idle plus checked out) plus `pending` creations never exceeds `size`
//! - A connection older than `ttl` is never handed out
//! - A connection released with its error flag set is discarded and replaced
//!
//! # Data Flow
//! ```text
//! get(deadline)
//!     → pop idle (evict expired on the way)
//!     → none idle: wait for release / replacement until deadline
//!     → PooledConnection guard
//!
//! guard dropped
//!     → healthy: back to idle, wake one waiter
//!     → errored: close, spawn replacement (bounded attempts)
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};

use crate::error::{PoolError, RpcError};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::ReplenishPolicy;

/// A connection the pool can manage.
pub trait PoolConnection: Send + 'static {
    fn id(&self) -> u64;

    /// Creation time, used for TTL eviction.
    fn created(&self) -> Instant;

    fn remote(&self) -> &str;

    /// Set once the connection is known to be unusable.
    fn error(&self) -> Option<&RpcError>;

    /// Release underlying resources.
    fn close(self)
    where
        Self: Sized,
    {
        drop(self)
    }
}

/// Factory producing new connections.
pub type CreateConnection<C> = Arc<dyn Fn() -> BoxFuture<'static, Result<C, RpcError>> + Send + Sync>;

/// Pool construction options.
pub struct PoolOptions<C> {
    pub name: String,
    pub size: usize,
    pub ttl: Duration,
    pub create: Option<CreateConnection<C>>,
    pub replenish: ReplenishPolicy,
}

impl<C> PoolOptions<C> {
    pub fn new(name: impl Into<String>, size: usize, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            size,
            ttl,
            create: None,
            replenish: ReplenishPolicy::default(),
        }
    }

    pub fn with_create(mut self, create: CreateConnection<C>) -> Self {
        self.create = Some(create);
        self
    }

    pub fn with_replenish(mut self, replenish: ReplenishPolicy) -> Self {
        self.replenish = replenish;
        self
    }
}

struct PoolState<C> {
    idle: VecDeque<C>,
    live: usize,
    pending: usize,
    closed: bool,
}

struct Shared<C> {
    name: String,
    size: usize,
    ttl: Duration,
    create: CreateConnection<C>,
    replenish: ReplenishPolicy,
    state: Mutex<PoolState<C>>,
    available: Notify,
    shutdown: Shutdown,
    runtime: Handle,
}

/// Connection pool for one logical server. Cheap to clone.
pub struct Pool<C: PoolConnection> {
    shared: Arc<Shared<C>>,
}

impl<C: PoolConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<C: PoolConnection> Pool<C> {
    /// Build the pool and warm it up with up to `size` connections.
    ///
    /// Warm-up creates connections one at a time; failures are logged and
    /// left for the first `get` to replenish.
    pub async fn new(opts: PoolOptions<C>) -> Result<Self, RpcError> {
        if opts.size == 0 {
            return Err(PoolError::PoolSize.into());
        }
        let create = opts.create.ok_or(PoolError::CreateConnHandleNotExist)?;

        let shared = Arc::new(Shared {
            name: opts.name,
            size: opts.size,
            ttl: opts.ttl,
            create,
            replenish: opts.replenish,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(opts.size),
                live: 0,
                pending: 0,
                closed: false,
            }),
            available: Notify::new(),
            shutdown: Shutdown::new(),
            runtime: Handle::current(),
        });

        for _ in 0..shared.size {
            match (shared.create)().await {
                Ok(conn) => {
                    tracing::debug!(pool = %shared.name, conn_id = conn.id(), remote = %conn.remote(), "Connection created");
                    let mut state = shared.lock();
                    state.idle.push_back(conn);
                    state.live += 1;
                }
                Err(err) => {
                    tracing::warn!(pool = %shared.name, error = %err, "Warm-up connection failed");
                }
            }
        }
        let live = shared.lock().live;
        metrics::record_pool_connections(&shared.name, live);
        tracing::info!(pool = %shared.name, live, size = shared.size, "Connection pool ready");

        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Idle plus checked-out connections.
    pub fn live(&self) -> usize {
        self.shared.lock().live
    }

    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Check out a connection, waiting until `deadline` for one to become idle.
    pub async fn get(&self, deadline: Instant) -> Result<PooledConnection<C>, RpcError> {
        let shared = &self.shared;
        loop {
            let notified = shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut expired = Vec::new();
            let (taken, deficit) = {
                let mut state = shared.lock();
                if state.closed {
                    return Err(PoolError::PoolGetTimeout.into());
                }
                let now = Instant::now();
                let mut taken = None;
                while let Some(conn) = state.idle.pop_front() {
                    if now.saturating_duration_since(conn.created()) >= shared.ttl {
                        state.live -= 1;
                        expired.push(conn);
                        continue;
                    }
                    taken = Some(conn);
                    break;
                }
                let deficit = shared.size.saturating_sub(state.live + state.pending);
                state.pending += deficit;
                (taken, deficit)
            };

            if !expired.is_empty() {
                for conn in expired {
                    tracing::debug!(pool = %shared.name, conn_id = conn.id(), "Connection expired");
                    conn.close();
                }
                metrics::record_pool_connections(&shared.name, self.live());
            }
            for _ in 0..deficit {
                Shared::spawn_replacement(shared);
            }

            if let Some(conn) = taken {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    shared: shared.clone(),
                });
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(deadline) => {
                    tracing::debug!(pool = %shared.name, "Timed out waiting for a connection");
                    return Err(PoolError::PoolGetTimeout.into());
                }
            }
        }
    }

    /// Close idle connections and stop replacements. Checked-out
    /// connections are closed when released. Idempotent.
    pub fn close(&self) {
        let idle: Vec<C> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<C> = state.idle.drain(..).collect();
            state.live -= idle.len();
            idle
        };
        self.shared.shutdown.trigger();
        self.shared.available.notify_waiters();
        for conn in idle {
            conn.close();
        }
        metrics::record_pool_connections(&self.shared.name, self.live());
        tracing::info!(pool = %self.shared.name, "Connection pool closed");
    }
}

impl<C: PoolConnection> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Pool")
            .field("name", &self.shared.name)
            .field("size", &self.shared.size)
            .field("live", &state.live)
            .field("idle", &state.idle.len())
            .field("pending", &state.pending)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<C: PoolConnection> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn one background creation. The caller has already counted it as pending.
    fn spawn_replacement(this: &Arc<Self>) {
        let shared = this.clone();
        this.runtime.spawn(async move { shared.replenish_one().await });
    }

    async fn replenish_one(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = shutdown.recv() => return self.finish_pending(None),
                result = (self.create)() => result,
            };
            let err = match result {
                Ok(conn) => return self.finish_pending(Some(conn)),
                Err(err) => err,
            };
            let Some(delay) = self.replenish.delay_after(attempt) else {
                tracing::warn!(pool = %self.name, attempts = attempt, error = %err, "Giving up on replacement connection");
                return self.finish_pending(None);
            };
            tracing::warn!(pool = %self.name, attempt, error = %err, "Replacement connection failed, retrying");
            tokio::select! {
                biased;
                _ = shutdown.recv() => return self.finish_pending(None),
                _ = sleep(delay) => {}
            }
        }
    }

    fn finish_pending(&self, conn: Option<C>) {
        let mut state = self.lock();
        state.pending -= 1;
        let Some(conn) = conn else {
            return;
        };
        if state.closed {
            drop(state);
            conn.close();
            return;
        }
        tracing::debug!(pool = %self.name, conn_id = conn.id(), remote = %conn.remote(), "Connection created");
        state.idle.push_back(conn);
        state.live += 1;
        let live = state.live;
        drop(state);
        metrics::record_pool_connections(&self.name, live);
        self.available.notify_one();
    }

    fn release(this: &Arc<Self>, conn: C) {
        let mut state = this.lock();
        if let Some(err) = conn.error() {
            tracing::debug!(pool = %this.name, conn_id = conn.id(), error = %err, "Discarding failed connection");
            state.live -= 1;
            let replace = !state.closed;
            if replace {
                state.pending += 1;
            }
            let live = state.live;
            drop(state);
            conn.close();
            metrics::record_pool_connections(&this.name, live);
            if replace {
                Self::spawn_replacement(this);
            }
            return;
        }
        if state.closed {
            state.live -= 1;
            drop(state);
            conn.close();
            return;
        }
        state.idle.push_back(conn);
        drop(state);
        this.available.notify_one();
    }
}

/// A checked-out connection. Returned to its pool on drop.
pub struct PooledConnection<C: PoolConnection> {
    conn: Option<C>,
    shared: Arc<Shared<C>>,
}

impl<C: PoolConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: PoolConnection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: PoolConnection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("PooledConnection");
        out.field("pool", &self.shared.name);
        if let Some(conn) = &self.conn {
            out.field("id", &conn.id()).field("remote", &conn.remote());
        }
        out.finish()
    }
}

impl<C: PoolConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            Shared::release(&self.shared, conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeConn {
        id: u64,
        created: Instant,
        error: Option<RpcError>,
    }

    impl PoolConnection for FakeConn {
        fn id(&self) -> u64 {
            self.id
        }

        fn created(&self) -> Instant {
            self.created
        }

        fn remote(&self) -> &str {
            "fake"
        }

        fn error(&self) -> Option<&RpcError> {
            self.error.as_ref()
        }
    }

    #[derive(Clone, Default)]
    struct Factory {
        next_id: Arc<AtomicU64>,
        failing: Arc<AtomicBool>,
    }

    impl Factory {
        fn create(&self) -> CreateConnection<FakeConn> {
            let this = self.clone();
            Arc::new(move || {
                let this = this.clone();
                Box::pin(async move {
                    if this.failing.load(Ordering::SeqCst) {
                        return Err(RpcError::internal("fake", "dial refused"));
                    }
                    Ok(FakeConn {
                        id: this.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                        created: Instant::now(),
                        error: None,
                    })
                })
            })
        }

        fn created(&self) -> u64 {
            self.next_id.load(Ordering::SeqCst)
        }
    }

    async fn pool(size: usize, ttl: Duration, factory: &Factory) -> Pool<FakeConn> {
        let opts = PoolOptions::new("test", size, ttl)
            .with_create(factory.create())
            .with_replenish(ReplenishPolicy::new(3, Duration::from_millis(10)));
        Pool::new(opts).await.unwrap()
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(200)
    }

    #[tokio::test]
    async fn rejects_invalid_options() {
        let zero = PoolOptions::new("z", 0, Duration::from_secs(1)).with_create(Factory::default().create());
        assert_eq!(Pool::new(zero).await.err(), Some(RpcError::Pool(PoolError::PoolSize)));

        let missing = PoolOptions::<FakeConn>::new("m", 2, Duration::from_secs(1));
        assert_eq!(
            Pool::new(missing).await.err(),
            Some(RpcError::Pool(PoolError::CreateConnHandleNotExist))
        );
    }

    #[tokio::test]
    async fn warm_up_fills_the_pool() {
        let factory = Factory::default();
        let pool = pool(3, Duration::from_secs(60), &factory).await;
        assert_eq!(pool.live(), 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn checked_out_connections_format_for_debugging() {
        let factory = Factory::default();
        let pool = pool(1, Duration::from_secs(60), &factory).await;
        let conn = pool.get(soon()).await.unwrap();
        assert_eq!(format!("{conn:?}"), r#"PooledConnection { pool: "test", id: 1, remote: "fake" }"#);

        drop(conn);
        pool.close();
        let err = pool.get(soon()).await.unwrap_err();
        assert_eq!(err, RpcError::Pool(PoolError::PoolGetTimeout));
    }

    #[tokio::test]
    async fn released_connections_are_reused() {
        let factory = Factory::default();
        let pool = pool(1, Duration::from_secs(60), &factory).await;
        let first = pool.get(soon()).await.unwrap().id();
        let second = pool.get(soon()).await.unwrap().id();
        assert_eq!(first, second);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn failed_connection_is_replaced() {
        let factory = Factory::default();
        let pool = pool(2, Duration::from_secs(60), &factory).await;

        {
            let mut conn = pool.get(soon()).await.unwrap();
            conn.error = Some(RpcError::internal("fake", "broken pipe"));
        }
        assert_eq!(pool.live(), 1);

        let a = pool.get(soon()).await.unwrap();
        let b = pool.get(soon()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.live(), 2);
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let factory = Factory::default();
        let pool = pool(1, Duration::from_secs(60), &factory).await;
        let _held = pool.get(soon()).await.unwrap();

        let started = Instant::now();
        let res = pool.get(Instant::now() + Duration::from_millis(50)).await;
        assert_eq!(res.err(), Some(RpcError::Pool(PoolError::PoolGetTimeout)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn waiter_receives_released_connection() {
        let factory = Factory::default();
        let pool = pool(1, Duration::from_secs(60), &factory).await;
        let held = pool.get(soon()).await.unwrap();
        let id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(Instant::now() + Duration::from_secs(1)).await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), Ok(id));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_connections_are_evicted() {
        let factory = Factory::default();
        let pool = pool(2, Duration::from_secs(10), &factory).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let conn = pool.get(Instant::now() + Duration::from_secs(1)).await.unwrap();
        assert!(conn.id() > 2, "got expired connection {}", conn.id());
        assert!(Instant::now().saturating_duration_since(conn.created()) < Duration::from_secs(10));
        drop(conn);
        assert!(pool.live() <= 2);
    }

    #[tokio::test]
    async fn replacement_gives_up_after_bounded_attempts() {
        let factory = Factory::default();
        let pool = pool(1, Duration::from_secs(60), &factory).await;
        factory.failing.store(true, Ordering::SeqCst);

        {
            let mut conn = pool.get(soon()).await.unwrap();
            conn.error = Some(RpcError::internal("fake", "reset"));
        }
        let res = pool.get(Instant::now() + Duration::from_millis(100)).await;
        assert!(res.is_err());
        assert_eq!(pool.live(), 0);

        factory.failing.store(false, Ordering::SeqCst);
        let conn = pool.get(Instant::now() + Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn.id(), 2);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkouts() {
        let factory = Factory::default();
        let pool = pool(2, Duration::from_secs(60), &factory).await;
        let held = pool.get(soon()).await.unwrap();
        pool.close();
        pool.close();

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.get(soon()).await.err(), Some(RpcError::Pool(PoolError::PoolGetTimeout)));
        drop(held);
        assert_eq!(pool.live(), 0);
    }
}
