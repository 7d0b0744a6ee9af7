//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: probing whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: ready_to_trip(counts) after a recorded failure
//! Open → Half-Open: first state read at or after expiry
//! Half-Open → Closed: consecutive successes >= max_requests
//! Half-Open → Open: any failure
//! ```
//!
//! Every transition clears the counters. State, counters and expiry live under
//! one mutex; the lock is never held across the guarded request or the observer.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::observability::metrics;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUESTS: u32 = 1;
pub const DEFAULT_CONSECUTIVE_FAILURES: u32 = 5;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl State {
    /// Numeric form for gauges.
    pub fn as_gauge(self) -> f64 {
        match self {
            State::Closed => 0.0,
            State::HalfOpen => 1.0,
            State::Open => 2.0,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => write!(f, "closed"),
            State::HalfOpen => write!(f, "half-open"),
            State::Open => write!(f, "open"),
        }
    }
}

/// Request and outcome counters for the current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

pub type ReadyToTrip = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;
pub type StateObserver = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Breaker configuration. Builder methods follow last-write-wins.
#[derive(Clone)]
pub struct BreakerSettings {
    pub name: String,
    /// Trial requests admitted while half-open, and successes needed to close.
    pub max_requests: u32,
    /// How long the breaker stays open.
    pub timeout: Duration,
    pub ready_to_trip: ReadyToTrip,
    pub on_state_change: Option<StateObserver>,
}

impl BreakerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::default()
            .with_max_requests(config.max_requests)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .trip_when_consecutive_failures_exceed(config.consecutive_failures)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ready_to_trip(mut self, f: impl Fn(&Counts) -> bool + Send + Sync + 'static) -> Self {
        self.ready_to_trip = Arc::new(f);
        self
    }

    /// Trip once more than `n` failures happened in a row.
    pub fn trip_when_consecutive_failures_exceed(self, n: u32) -> Self {
        self.with_ready_to_trip(move |counts| counts.consecutive_failures > n)
    }

    pub fn with_on_state_change(mut self, f: impl Fn(&str, State, State) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_requests: DEFAULT_MAX_REQUESTS,
            timeout: DEFAULT_TIMEOUT,
            ready_to_trip: Arc::new(|counts| counts.consecutive_failures > DEFAULT_CONSECUTIVE_FAILURES),
            on_state_change: None,
        }
    }
}

impl fmt::Debug for BreakerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerSettings")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of running a guarded request.
enum Outcome<T, E> {
    Completed(Result<T, E>),
    /// The request panicked; the payload is re-raised after bookkeeping.
    Fault(Box<dyn Any + Send>),
}

type Transition = Option<(State, State)>;

#[derive(Debug)]
struct Inner {
    state: State,
    counts: Counts,
    /// Only meaningful while open.
    expiry: Option<Instant>,
}

impl Inner {
    /// Current state, applying the lazy Open → HalfOpen transition.
    fn current_state(&mut self, now: Instant, timeout: Duration) -> (State, Transition) {
        let mut transition = None;
        if self.state == State::Open && self.expiry.is_some_and(|expiry| now >= expiry) {
            transition = self.set_state(State::HalfOpen, now, timeout);
        }
        (self.state, transition)
    }

    fn set_state(&mut self, state: State, now: Instant, timeout: Duration) -> Transition {
        if self.state == state {
            return None;
        }
        let prev = self.state;
        self.state = state;
        self.counts.clear();
        self.expiry = match state {
            State::Open => Some(now + timeout),
            State::Closed | State::HalfOpen => None,
        };
        Some((prev, state))
    }
}

/// An admitted async request. Dropped before it settles (the caller's future
/// was cancelled), it counts as a failure so a half-open trial slot is not leaked.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Admission<'_> {
    fn disarm(mut self) {
        self.settled = true;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(breaker = %self.breaker.name(), "Admitted request abandoned");
            self.breaker.on_failure();
        }
    }
}

/// A named circuit breaker.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        metrics::record_breaker_state(&settings.name, State::Closed);
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: State::Closed,
                counts: Counts::default(),
                expiry: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Current state, resolving an elapsed open period into half-open.
    pub fn state(&self) -> State {
        let (state, transition) = self.lock().current_state(Instant::now(), self.settings.timeout);
        self.notify(transition);
        state
    }

    /// Snapshot of the counters.
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Run `req` if the breaker admits it.
    pub fn execute<T, E, F>(&self, req: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<BreakerError>,
    {
        self.execute_inner(req, None::<fn(BreakerError) -> Result<T, E>>, |_: &E| false)
    }

    /// Like [`execute`](Self::execute); errors for which `acceptable` returns true count as successes.
    pub fn execute_with_acceptable<T, E, F, A>(&self, req: F, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<BreakerError>,
        A: Fn(&E) -> bool,
    {
        self.execute_inner(req, None::<fn(BreakerError) -> Result<T, E>>, acceptable)
    }

    /// Like [`execute`](Self::execute); a rejection is handed to `fallback` instead of being returned.
    ///
    /// Failures of an admitted request are returned as-is; the fallback only covers rejections.
    pub fn execute_with_fallback<T, E, F, B>(&self, req: F, fallback: B) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
    {
        self.execute_inner(req, Some(fallback), |_: &E| false)
    }

    pub fn execute_with_fallback_acceptable<T, E, F, B, A>(&self, req: F, fallback: B, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        self.execute_inner(req, Some(fallback), acceptable)
    }

    /// Async form of [`execute`](Self::execute). `req` is only invoked when admitted.
    pub async fn call<T, E, F, Fut>(&self, req: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
    {
        self.call_inner(req, None::<fn(BreakerError) -> Result<T, E>>, |_: &E| false).await
    }

    pub async fn call_with_acceptable<T, E, F, Fut, A>(&self, req: F, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        A: Fn(&E) -> bool,
    {
        self.call_inner(req, None::<fn(BreakerError) -> Result<T, E>>, acceptable).await
    }

    pub async fn call_with_fallback<T, E, F, Fut, B>(&self, req: F, fallback: B) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
    {
        self.call_inner(req, Some(fallback), |_: &E| false).await
    }

    pub async fn call_with_fallback_acceptable<T, E, F, Fut, B, A>(
        &self,
        req: F,
        fallback: B,
        acceptable: A,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        self.call_inner(req, Some(fallback), acceptable).await
    }

    fn execute_inner<T, E, F, B, A>(&self, req: F, fallback: Option<B>, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        if let Err(rejection) = self.accept() {
            return reject(rejection, fallback);
        }
        let outcome = match panic::catch_unwind(AssertUnwindSafe(req)) {
            Ok(result) => Outcome::Completed(result),
            Err(payload) => Outcome::Fault(payload),
        };
        self.settle(outcome, acceptable)
    }

    async fn call_inner<T, E, F, Fut, B, A>(&self, req: F, fallback: Option<B>, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        B: FnOnce(BreakerError) -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        if let Err(rejection) = self.accept() {
            return reject(rejection, fallback);
        }
        let admission = Admission { breaker: self, settled: false };
        let outcome = match AssertUnwindSafe(req()).catch_unwind().await {
            Ok(result) => Outcome::Completed(result),
            Err(payload) => Outcome::Fault(payload),
        };
        admission.disarm();
        self.settle(outcome, acceptable)
    }

    fn settle<T, E, A>(&self, outcome: Outcome<T, E>, acceptable: A) -> Result<T, E>
    where
        A: Fn(&E) -> bool,
    {
        match outcome {
            Outcome::Fault(payload) => {
                self.on_failure();
                panic::resume_unwind(payload)
            }
            Outcome::Completed(result) => {
                let success = match &result {
                    Ok(_) => true,
                    Err(err) => acceptable(err),
                };
                if success {
                    self.on_success();
                } else {
                    self.on_failure();
                }
                result
            }
        }
    }

    /// Admission gate.
    fn accept(&self) -> Result<(), BreakerError> {
        let (verdict, transition) = {
            let mut inner = self.lock();
            let (state, transition) = inner.current_state(Instant::now(), self.settings.timeout);
            let verdict = match state {
                State::Open => Err(BreakerError::OpenState),
                State::HalfOpen if inner.counts.requests >= self.settings.max_requests => {
                    Err(BreakerError::TooManyRequests)
                }
                _ => {
                    inner.counts.on_request();
                    Ok(())
                }
            };
            (verdict, transition)
        };
        self.notify(transition);
        verdict
    }

    fn on_success(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                State::Closed => {
                    inner.counts.on_success();
                    None
                }
                State::HalfOpen => {
                    inner.counts.on_success();
                    if inner.counts.consecutive_successes >= self.settings.max_requests {
                        inner.set_state(State::Closed, Instant::now(), self.settings.timeout)
                    } else {
                        None
                    }
                }
                State::Open => None,
            }
        };
        self.notify(transition);
    }

    fn on_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                State::Closed => {
                    inner.counts.on_failure();
                    if (self.settings.ready_to_trip)(&inner.counts) {
                        inner.set_state(State::Open, Instant::now(), self.settings.timeout)
                    } else {
                        None
                    }
                }
                State::HalfOpen => inner.set_state(State::Open, Instant::now(), self.settings.timeout),
                State::Open => None,
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };
        tracing::info!(breaker = %self.settings.name, %from, %to, "Circuit breaker state changed");
        metrics::record_breaker_state(&self.settings.name, to);
        if let Some(observer) = &self.settings.on_state_change {
            observer(&self.settings.name, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("inner", &*self.lock())
            .finish()
    }
}

fn reject<T, E, B>(rejection: BreakerError, fallback: Option<B>) -> Result<T, E>
where
    E: From<BreakerError>,
    B: FnOnce(BreakerError) -> Result<T, E>,
{
    match fallback {
        Some(fallback) => fallback(rejection),
        None => Err(rejection.into()),
    }
}
