//! Retry schedule for background connection creation.

use std::time::Duration;

/// Bounded, fixed-delay schedule used when a pool replaces a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplenishPolicy {
    /// Creation attempts before giving up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl ReplenishPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Delay to wait after failed attempt `attempt` (1-based), or `None` when exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

impl Default for ReplenishPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_is_bounded() {
        let policy = ReplenishPolicy::default();
        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(9), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(10), None);
    }
}
