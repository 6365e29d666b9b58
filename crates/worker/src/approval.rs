//! Approval gate: staff approval and owner/staff cancellation.
//!
//! Approving moves a `pending` execution to `approved` and enqueues it;
//! cancelling moves a `pending` or `approved` execution to `cancelled`.
//! Both are conditional updates, so a concurrent start or second approval
//! surfaces as [`CoreError::Conflict`] instead of a double transition.

use idp_core::error::CoreError;
use idp_core::operations::access::{self, Actor};
use idp_core::operations::status::{ExecutionStatus, STARTABLE_STATUSES};
use idp_core::types::DbId;
use idp_db::models::operation::OperationExecution;

use crate::error::EngineResult;
use crate::logger::ExecutionLogger;
use crate::queue::QueueHandle;
use crate::store::OperationStore;

/// Handles approve/cancel requests for executions.
#[derive(Debug, Clone)]
pub struct ApprovalGate<S> {
    store: S,
    logger: ExecutionLogger<S>,
    queue: QueueHandle,
}

impl<S: OperationStore> ApprovalGate<S> {
    pub fn new(store: S, queue: QueueHandle) -> Self {
        Self {
            logger: ExecutionLogger::new(store.clone()),
            store,
            queue,
        }
    }

    /// Approve a pending execution and enqueue it for execution.
    pub async fn approve(
        &self,
        execution_id: DbId,
        approver: &Actor,
    ) -> EngineResult<OperationExecution> {
        let execution = self.load(execution_id).await?;
        access::ensure_can_approve(approver, execution.status()?)?;

        if !self
            .store
            .approve_execution(execution_id, approver.user_id)
            .await?
        {
            return Err(CoreError::Conflict(
                "Operation is no longer pending".to_string(),
            )
            .into());
        }
        self.logger
            .info(
                execution_id,
                format!("Operation approved by user {}", approver.user_id),
            )
            .await?;
        self.queue.enqueue_execution(execution_id).await?;

        tracing::info!(execution_id, approver_id = approver.user_id, "Execution approved");
        self.load(execution_id).await
    }

    /// Cancel an execution that has not started.
    pub async fn cancel(
        &self,
        execution_id: DbId,
        actor: &Actor,
    ) -> EngineResult<OperationExecution> {
        let execution = self.load(execution_id).await?;
        access::ensure_can_cancel(actor, execution.user_id, execution.status()?)?;

        if !self
            .store
            .transition(execution_id, &STARTABLE_STATUSES, ExecutionStatus::Cancelled)
            .await?
        {
            return Err(CoreError::Conflict(
                "Operation has already started or finished".to_string(),
            )
            .into());
        }
        self.logger
            .info(
                execution_id,
                format!("Operation cancelled by user {}", actor.user_id),
            )
            .await?;

        tracing::info!(execution_id, user_id = actor.user_id, "Execution cancelled");
        self.load(execution_id).await
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
