//! Periodic cleanup of old executions.
//!
//! Each sweep first fails executions abandoned in `running` (their lease,
//! `started_at` plus the template's worst-case run time, has expired), then
//! deletes terminal executions older than the retention window. Logs are
//! removed with their execution. Non-terminal executions are never deleted.

use std::time::Duration;

use chrono::Utc;
use idp_core::operations::retention::{
    retention_cutoff, StaleRunPolicy, ABANDONED_MESSAGE, DEFAULT_RETENTION_DAYS,
};
use idp_core::operations::status::LogLevel;
use idp_core::types::{DbId, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::EngineResult;
use crate::logger::ExecutionLogger;
use crate::store::OperationStore;

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Executions deleted for being past retention.
    pub deleted: u64,
    /// Executions failed for being abandoned while running.
    pub abandoned: Vec<DbId>,
}

/// Deletes expired executions and reaps abandoned ones.
pub struct RetentionSweeper<S> {
    store: S,
    logger: ExecutionLogger<S>,
    retention_days: i64,
    stale: StaleRunPolicy,
    interval: Duration,
}

impl<S: OperationStore> RetentionSweeper<S> {
    /// Sweeper with the default 30-day window, run daily.
    pub fn new(store: S) -> Self {
        Self {
            logger: ExecutionLogger::new(store.clone()),
            store,
            retention_days: DEFAULT_RETENTION_DAYS,
            stale: StaleRunPolicy::default(),
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn from_config(store: S, config: &WorkerConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            stale: StaleRunPolicy {
                factor: config.stale_running_factor,
                retry_base_delay: config.retry_base_delay,
                retry_max_delay: config.retry_max_delay,
            },
            interval: config.sweep_interval,
            ..Self::new(store)
        }
    }

    /// Run a single sweep as of `now`.
    pub async fn sweep_once(&self, now: Timestamp) -> EngineResult<SweepReport> {
        let abandoned = self
            .store
            .fail_stale_running(now, self.stale, ABANDONED_MESSAGE)
            .await?;
        for &execution_id in &abandoned {
            self.logger
                .log_best_effort(execution_id, LogLevel::Error, ABANDONED_MESSAGE.to_string())
                .await;
        }

        let deleted = self
            .store
            .delete_terminal_older_than(retention_cutoff(now, self.retention_days))
            .await?;

        Ok(SweepReport { deleted, abandoned })
    }

    /// Run the sweep loop until `cancel` is triggered.
    ///
    /// The first sweep runs immediately.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            retention_days = self.retention_days,
            interval_secs = self.interval.as_secs(),
            "Execution retention job started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Execution retention job stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) => {
                            if report.deleted > 0 || !report.abandoned.is_empty() {
                                tracing::info!(
                                    deleted = report.deleted,
                                    abandoned = report.abandoned.len(),
                                    "Execution retention: sweep finished"
                                );
                            } else {
                                tracing::debug!("Execution retention: nothing to do");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Execution retention: sweep failed");
                        }
                    }
                }
            }
        }
    }
}
