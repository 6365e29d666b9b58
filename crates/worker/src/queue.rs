//! In-process job queue and the worker loop that drains it.
//!
//! Jobs travel over a bounded `tokio::sync::mpsc` channel. [`Worker::run`]
//! processes up to `concurrency` jobs at a time and never lets a failing or
//! panicking job stop the loop. On shutdown the channel is closed and every
//! job already queued is still run, since the dispatcher has marked those
//! submissions `processing`.

use std::sync::Arc;

use idp_core::operations::runner::CommandRunner;
use idp_core::types::DbId;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::executor::OperationExecutor;
use crate::orchestrator::SubmissionOrchestrator;
use crate::store::OperationStore;

/// A unit of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Create and run the executions for a submission.
    ProcessSubmission(DbId),
    /// Run one (typically just approved) execution.
    ExecuteOperation(DbId),
}

/// Cloneable sending side of the job queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<Job>,
}

/// Receiving side of the job queue, consumed by [`Worker`].
pub type JobReceiver = mpsc::Receiver<Job>;

/// Create a bounded job queue.
pub fn channel(capacity: usize) -> (QueueHandle, JobReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (QueueHandle { sender }, receiver)
}

impl QueueHandle {
    /// Enqueue a submission for processing. Returns without waiting for it.
    pub async fn submit(&self, submission_id: DbId) -> EngineResult<()> {
        self.push(Job::ProcessSubmission(submission_id)).await
    }

    /// Enqueue a single execution.
    pub async fn enqueue_execution(&self, execution_id: DbId) -> EngineResult<()> {
        self.push(Job::ExecuteOperation(execution_id)).await
    }

    async fn push(&self, job: Job) -> EngineResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|e| EngineError::Queue(format!("job queue is closed, dropped {:?}", e.0)))?;
        tracing::debug!(?job, "Job enqueued");
        Ok(())
    }
}

/// Pulls jobs off the queue and runs them.
pub struct Worker<S, R> {
    orchestrator: Arc<SubmissionOrchestrator<S, R>>,
    executor: Arc<OperationExecutor<S, R>>,
    receiver: JobReceiver,
    concurrency: usize,
}

impl<S, R> Worker<S, R>
where
    S: OperationStore,
    R: CommandRunner + 'static,
{
    pub fn new(
        orchestrator: Arc<SubmissionOrchestrator<S, R>>,
        executor: Arc<OperationExecutor<S, R>>,
        receiver: JobReceiver,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            executor,
            receiver,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `cancel` fires or every [`QueueHandle`] is dropped, then
    /// run the jobs still queued and wait for all of them to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        tracing::info!(concurrency = self.concurrency, "Operation worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Operation worker shutting down");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_result(result);
                }
                job = self.receiver.recv() => {
                    let Some(job) = job else {
                        tracing::info!("Job queue closed, worker stopping");
                        break;
                    };
                    self.spawn_job(&mut tasks, &permits, job).await;
                }
            }
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Some(job) = self.receiver.recv().await {
            drained += 1;
            self.spawn_job(&mut tasks, &permits, job).await;
        }
        if drained > 0 {
            tracing::info!(drained, "Ran jobs left in the queue at shutdown");
        }

        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }
        tracing::info!("Operation worker stopped");
    }

    /// Wait for a free slot, then run `job` on its own task.
    async fn spawn_job(&self, tasks: &mut JoinSet<()>, permits: &Arc<Semaphore>, job: Job) {
        let permit = match Arc::clone(permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(?job, error = %e, "Worker semaphore closed, job dropped");
                return;
            }
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let executor = Arc::clone(&self.executor);
        tasks.spawn(async move {
            let _permit = permit;
            handle_job(&*orchestrator, &*executor, job).await;
        });
    }
}

/// Run one job, logging (never propagating) its failure.
pub async fn handle_job<S, R>(
    orchestrator: &SubmissionOrchestrator<S, R>,
    executor: &OperationExecutor<S, R>,
    job: Job,
) where
    S: OperationStore,
    R: CommandRunner,
{
    match job {
        Job::ProcessSubmission(submission_id) => match orchestrator.process(submission_id).await {
            Ok(report) => tracing::debug!(submission_id, ?report, "Submission job finished"),
            Err(e) => tracing::error!(submission_id, error = %e, "Submission processing failed"),
        },
        Job::ExecuteOperation(execution_id) => match executor.execute(execution_id).await {
            Ok(outcome) => tracing::debug!(execution_id, ?outcome, "Execution job finished"),
            Err(e) => tracing::error!(execution_id, error = %e, "Execution job failed"),
        },
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Job panicked");
        } else {
            tracing::warn!(error = %e, "Job was cancelled");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
