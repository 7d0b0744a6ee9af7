//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Client::call:
//!     → timeouts.rs (resolve the effective deadline)
//!     → breaker_wrapper.rs (optional: per-service circuit_breaker.rs gate)
//!     → attempt fails: retries.rs (predicate decides retry / surface)
//!
//! Pool replacement:
//!     → backoff.rs (bounded attempts, fixed delay)
//! ```
//!
//! # Design Decisions
//! - Every call has a deadline; waits never outlive it
//! - Breakers are per dependency, never global
//! - Retry policy is a plain predicate so callers can classify their own errors

pub mod backoff;
pub mod breaker_wrapper;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::ReplenishPolicy;
pub use breaker_wrapper::BreakerWrapper;
pub use circuit_breaker::{BreakerSettings, CircuitBreaker, Counts, State};
pub use retries::{retry_always, retry_never, retry_on_error, RetryFn};
