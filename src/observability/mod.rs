//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (spans and X-Trace-Id propagation across calls)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the client request into the handler context
//! - Metrics are cheap and no-ops until a recorder is installed
//! - Trace propagation is a pair of ordinary wrappers, not part of the core

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::metrics::TimingWrapper;
pub use self::tracing::{TraceCallWrapper, TraceHandlerWrapper, TRACE_HEADER};
