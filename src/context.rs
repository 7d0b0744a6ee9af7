//! Per-call context: deadline, cancellation and propagated metadata.

use std::time::Duration;

use tokio::time::Instant;

use crate::lifecycle::ShutdownSignal;
use crate::message::Header;

/// Carries the deadline, an optional cancellation signal and metadata
/// (such as trace context) through wrappers and handlers.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<ShutdownSignal>,
    metadata: Header,
}

impl Context {
    /// Empty context with no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Bound the context to `timeout` from now, keeping an earlier existing deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the context to `deadline`, keeping an earlier existing deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancel(mut self, signal: ShutdownSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn with_metadata(mut self, metadata: Header) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn metadata(&self) -> &Header {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Header {
        &mut self.metadata
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(ShutdownSignal::is_triggered)
    }

    /// Resolve when the cancellation signal fires; never resolves without one.
    pub async fn canceled(&self) {
        match &self.cancel {
            Some(signal) => signal.clone().recv().await,
            None => std::future::pending().await,
        }
    }
}
