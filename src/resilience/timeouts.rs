//! Deadline resolution for client calls.

use std::time::Duration;

use tokio::time::Instant;

/// Resolve the effective deadline of a call.
///
/// A deadline already carried by the caller's context wins, and the request
/// timeout is rewritten to the time remaining until it. Otherwise the deadline
/// is `now + request_timeout`.
pub fn resolve_deadline(ctx_deadline: Option<Instant>, request_timeout: &mut Duration, now: Instant) -> Instant {
    match ctx_deadline {
        Some(deadline) => {
            *request_timeout = deadline.saturating_duration_since(now);
            deadline
        }
        None => now + *request_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_deadline_overrides_request_timeout() {
        let now = Instant::now();
        let mut timeout = Duration::from_secs(3);
        let deadline = resolve_deadline(Some(now + Duration::from_millis(250)), &mut timeout, now);
        assert_eq!(deadline, now + Duration::from_millis(250));
        assert_eq!(timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn request_timeout_derives_deadline() {
        let now = Instant::now();
        let mut timeout = Duration::from_millis(100);
        assert_eq!(resolve_deadline(None, &mut timeout, now), now + Duration::from_millis(100));
        assert_eq!(timeout, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn past_deadline_leaves_zero_budget() {
        let now = Instant::now();
        let mut timeout = Duration::from_secs(1);
        resolve_deadline(Some(now - Duration::from_millis(5)), &mut timeout, now);
        assert_eq!(timeout, Duration::ZERO);
    }
}
