//! Retry policy for failed operation runs.
//!
//! A template's `retry_count` is the number of *additional* attempts made
//! after a failed run (non-zero exit, timeout, spawn failure). Delays grow
//! exponentially from `base_delay` and are capped at `max_delay`.

use std::time::Duration;

/// Default first backoff delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff bounded by a template's retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the default delays and `max_retries` extra attempts.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Override the delay bounds.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Sum of every backoff delay the policy can sleep through.
    pub fn total_delay(&self) -> Duration {
        // From retry 32 on the exponent is pinned, so every delay is equal.
        let growing = self.max_retries.min(31);
        let pinned = self.max_retries - growing;
        (1..=growing)
            .fold(Duration::ZERO, |total, retry| {
                total.saturating_add(self.delay_for(retry))
            })
            .saturating_add(self.delay_for(32).saturating_mul(pinned))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn retries_are_bounded() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy::new(10)
            .with_delays(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn total_delay_sums_every_backoff() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.total_delay(), Duration::from_secs(1 + 2 + 4));

        let capped = RetryPolicy::new(10)
            .with_delays(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(capped.total_delay(), Duration::from_millis(100 + 200 + 400 + 7 * 500));

        assert_eq!(RetryPolicy::default().total_delay(), Duration::ZERO);
        assert_eq!(
            RetryPolicy::new(u32::MAX).total_delay(),
            DEFAULT_MAX_DELAY.saturating_mul(u32::MAX - 6)
                + Duration::from_secs(1 + 2 + 4 + 8 + 16 + 32)
        );
    }

    #[test]
    fn zero_base_delay_never_sleeps() {
        let policy = RetryPolicy::new(3).with_delays(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }
}
