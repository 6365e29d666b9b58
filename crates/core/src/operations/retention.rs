//! Retention window and stale-run thresholds.
//!
//! Terminal executions older than the retention window are purged with their
//! logs. Executions stuck in `running` past their stale threshold are treated
//! as abandoned by a crashed worker.

use chrono::{DateTime, Duration, Utc};

use crate::operations::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::types::Timestamp;

/// Default retention window for terminal executions.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Default multiplier applied to an execution's worst-case run time before
/// it is considered abandoned.
pub const DEFAULT_STALE_RUNNING_FACTOR: i64 = 2;

/// Error text recorded on executions failed by the stale-run sweep.
pub const ABANDONED_MESSAGE: &str = "Execution abandoned: worker stopped while running";

/// Executions created before this instant are eligible for deletion.
pub fn retention_cutoff(now: Timestamp, retention_days: i64) -> Timestamp {
    Duration::try_days(retention_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Ceiling for any stale threshold (about a century).
pub const MAX_STALE_SECONDS: i64 = 100 * 365 * 24 * 3600;

/// Decides when a `running` execution counts as abandoned.
///
/// The allowance is every attempt's timeout scaled by `factor`, plus every
/// backoff sleep between attempts, capped at [`MAX_STALE_SECONDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleRunPolicy {
    pub factor: i64,
    pub retry_base_delay: std::time::Duration,
    pub retry_max_delay: std::time::Duration,
}

impl Default for StaleRunPolicy {
    fn default() -> Self {
        Self {
            factor: DEFAULT_STALE_RUNNING_FACTOR,
            retry_base_delay: DEFAULT_BASE_DELAY,
            retry_max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl StaleRunPolicy {
    /// How long an execution of a template with these settings may stay
    /// `running`. Never less than one timeout.
    pub fn threshold(&self, timeout_seconds: i32, retry_count: i32) -> Duration {
        let retries = u32::try_from(retry_count).unwrap_or(0);
        let attempts = i64::from(retries) + 1;
        let run_ms = i64::from(timeout_seconds.max(1))
            .saturating_mul(attempts)
            .saturating_mul(self.factor.max(1))
            .saturating_mul(1000);
        let backoff = RetryPolicy::new(retries)
            .with_delays(self.retry_base_delay, self.retry_max_delay)
            .total_delay();
        let backoff_ms = i64::try_from(backoff.as_millis()).unwrap_or(i64::MAX);
        Duration::milliseconds(
            run_ms
                .saturating_add(backoff_ms)
                .min(MAX_STALE_SECONDS * 1000),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
