//! Entry points for request-handling collaborators.
//!
//! [`OperationService`] is what a web or CLI layer holds: it enqueues
//! submissions, forwards approve/cancel to the [`ApprovalGate`], and returns
//! read-only projections filtered by the caller's permissions.

use idp_core::error::CoreError;
use idp_core::operations::access::{self, Actor};
use idp_core::operations::status::{ExecutionStatus, LogLevel};
use idp_core::types::{DbId, Timestamp};
use idp_db::models::operation::{OperationExecution, OperationLog};
use serde::Serialize;

use crate::approval::ApprovalGate;
use crate::error::EngineResult;
use crate::queue::QueueHandle;
use crate::store::OperationStore;

/// Read-only projection of an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionView {
    pub id: DbId,
    pub template_id: DbId,
    pub submission_id: DbId,
    pub user_id: DbId,
    pub status: ExecutionStatus,
    pub executed_command: String,
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub approved_by: Option<DbId>,
    pub approved_at: Option<Timestamp>,
    pub created_at: Timestamp,
    /// `completed_at - started_at` when both are set.
    pub duration_ms: Option<i64>,
}

impl TryFrom<OperationExecution> for ExecutionView {
    type Error = CoreError;

    fn try_from(execution: OperationExecution) -> Result<Self, Self::Error> {
        Ok(Self {
            status: execution.status()?,
            duration_ms: execution.duration_ms(),
            id: execution.id,
            template_id: execution.template_id,
            submission_id: execution.submission_id,
            user_id: execution.user_id,
            executed_command: execution.executed_command,
            output: execution.output,
            error_output: execution.error_output,
            exit_code: execution.exit_code,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            approved_by: execution.approved_by,
            approved_at: execution.approved_at,
            created_at: execution.created_at,
        })
    }
}

/// Read-only projection of a log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogView {
    pub id: DbId,
    pub level: Option<LogLevel>,
    pub message: String,
    pub timestamp: Timestamp,
}

impl From<OperationLog> for LogView {
    fn from(log: OperationLog) -> Self {
        Self {
            level: log.level(),
            id: log.id,
            message: log.message,
            timestamp: log.timestamp,
        }
    }
}

/// Facade over the queue, the approval gate and the read models.
#[derive(Debug, Clone)]
pub struct OperationService<S> {
    store: S,
    queue: QueueHandle,
    gate: ApprovalGate<S>,
}

impl<S: OperationStore> OperationService<S> {
    pub fn new(store: S, queue: QueueHandle) -> Self {
        Self {
            gate: ApprovalGate::new(store.clone(), queue.clone()),
            store,
            queue,
        }
    }

    /// Enqueue a submission for asynchronous processing.
    pub async fn submit(&self, submission_id: DbId) -> EngineResult<()> {
        self.queue.submit(submission_id).await
    }

    pub async fn approve(&self, execution_id: DbId, actor: &Actor) -> EngineResult<ExecutionView> {
        Ok(self.gate.approve(execution_id, actor).await?.try_into()?)
    }

    pub async fn cancel(&self, execution_id: DbId, actor: &Actor) -> EngineResult<ExecutionView> {
        Ok(self.gate.cancel(execution_id, actor).await?.try_into()?)
    }

    /// Executions visible to `actor`, most recent first.
    ///
    /// Staff see every execution; other users only their own.
    pub async fn executions_for(
        &self,
        actor: &Actor,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> EngineResult<Vec<ExecutionView>> {
        let owner = (!actor.is_staff).then_some(actor.user_id);
        self.store
            .list_executions(owner, limit, offset)
            .await?
            .into_iter()
            .map(|execution| ExecutionView::try_from(execution).map_err(Into::into))
            .collect()
    }

    /// A single execution, if `actor` may see it.
    pub async fn execution(
        &self,
        execution_id: DbId,
        actor: &Actor,
    ) -> EngineResult<ExecutionView> {
        let execution = self.load(execution_id).await?;
        access::ensure_can_view(actor, execution.user_id)?;
        Ok(execution.try_into()?)
    }

    /// Log records of an execution, oldest first, if `actor` may see it.
    pub async fn logs_for(&self, execution_id: DbId, actor: &Actor) -> EngineResult<Vec<LogView>> {
        let execution = self.load(execution_id).await?;
        access::ensure_can_view(actor, execution.user_id)?;
        let logs = self.store.list_logs(execution_id).await?;
        Ok(logs.into_iter().map(LogView::from).collect())
    }

    /// Executions created for a submission, in creation order.
    pub async fn executions_for_submission(
        &self,
        submission_id: DbId,
        actor: &Actor,
    ) -> EngineResult<Vec<ExecutionView>> {
        let submission = self
            .store
            .find_submission(submission_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "PanelSubmission",
                id: submission_id,
            })?;
        access::ensure_can_view(actor, submission.user_id)?;
        self.store
            .list_executions_for_submission(submission_id)
            .await?
            .into_iter()
            .map(|execution| ExecutionView::try_from(execution).map_err(Into::into))
            .collect()
    }

    async fn load(&self, execution_id: DbId) -> EngineResult<OperationExecution> {
        Ok(self
            .store
            .find_execution(execution_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "OperationExecution",
                id: execution_id,
            })?)
    }
}
