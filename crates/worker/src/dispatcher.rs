//! Database poller feeding the in-process job queue.
//!
//! Submissions are created, and executions approved, by the request layer
//! in another process; the two sides only share persisted records. Every
//! `poll_interval` the dispatcher:
//!
//! - claims pending submissions (moving them to `processing` with
//!   `SKIP LOCKED`, so concurrent workers never share one) and enqueues a
//!   [`Job::ProcessSubmission`](crate::queue::Job) for each;
//! - enqueues every `approved` execution it has not already handed to the
//!   queue.
//!
//! On startup it first releases submissions left `processing` without any
//! executions, covering claims whose job was lost when a previous worker
//! stopped.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use idp_core::operations::status::{ExecutionStatus, SubmissionStatus};
use idp_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::error::EngineResult;
use crate::queue::QueueHandle;
use crate::store::OperationStore;

/// How often pending submissions are claimed.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum submissions claimed per poll.
const CLAIM_BATCH: i64 = 16;

/// Polls for pending submissions and approved executions and enqueues them.
pub struct SubmissionDispatcher<S> {
    store: S,
    queue: QueueHandle,
    poll_interval: Duration,
    /// Approved executions already enqueued by this dispatcher.
    handed_off: Mutex<HashSet<DbId>>,
}

impl<S: OperationStore> SubmissionDispatcher<S> {
    /// Create a dispatcher with the default 2-second poll interval.
    pub fn new(store: S, queue: QueueHandle) -> Self {
        Self {
            store,
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
            handed_off: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Return stranded `processing` submissions to `pending`. Returns how many.
    pub async fn release_stranded(&self) -> EngineResult<usize> {
        let released = self.store.release_stranded_submissions().await?;
        if !released.is_empty() {
            tracing::warn!(?released, "Released submissions stranded in processing");
        }
        Ok(released.len())
    }

    /// Enqueue approved executions not yet handed to the queue. Returns how many.
    pub async fn dispatch_approved(&self) -> EngineResult<usize> {
        let approved = self
            .store
            .list_execution_ids_with_status(ExecutionStatus::Approved)
            .await?;
        let fresh: Vec<DbId> = {
            let mut handed_off = self.handed_off();
            handed_off.retain(|id| approved.contains(id));
            approved
                .into_iter()
                .filter(|&id| handed_off.insert(id))
                .collect()
        };

        for (sent, &execution_id) in fresh.iter().enumerate() {
            if let Err(e) = self.queue.enqueue_execution(execution_id).await {
                self.handed_off().retain(|id| !fresh[sent..].contains(id));
                return Err(e);
            }
            tracing::info!(execution_id, "Approved execution enqueued");
        }
        Ok(fresh.len())
    }

    /// One poll: claim pending submissions and enqueue them. Returns how many.
    ///
    /// Claimed submissions that could not be enqueued go back to `pending`.
    pub async fn dispatch_once(&self) -> EngineResult<usize> {
        let claimed = self.store.claim_pending_submissions(CLAIM_BATCH).await?;
        for (sent, &submission_id) in claimed.iter().enumerate() {
            if let Err(e) = self.queue.submit(submission_id).await {
                self.unclaim(&claimed[sent..]).await;
                return Err(e);
            }
            tracing::info!(submission_id, "Submission claimed");
        }
        Ok(claimed.len())
    }

    /// Release stranded work, then poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.release_stranded().await {
            tracing::error!(error = %e, "Failed to release stranded submissions");
        }

        let mut poll = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Submission dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Submission dispatcher shutting down");
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.dispatch_once().await {
                        tracing::error!(error = %e, "Submission dispatch failed");
                    }
                    if let Err(e) = self.dispatch_approved().await {
                        tracing::error!(error = %e, "Approved execution dispatch failed");
                    }
                }
            }
        }
    }

    async fn unclaim(&self, submission_ids: &[DbId]) {
        for &submission_id in submission_ids {
            if let Err(e) = self
                .store
                .set_submission_status(submission_id, SubmissionStatus::Pending)
                .await
            {
                tracing::error!(submission_id, error = %e, "Failed to release claimed submission");
            }
        }
    }

    fn handed_off(&self) -> std::sync::MutexGuard<'_, HashSet<DbId>> {
        self.handed_off.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
