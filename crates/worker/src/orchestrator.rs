//! Drives a panel submission through its operation executions.
//!
//! Lifecycle:
//! 1. Load the submission and mark it `processing`. A submission that
//!    already has executions was processed before and is refused, so a
//!    redelivered job never runs its operations twice.
//! 2. Load the panel's active templates (ordered by name).
//! 3. Create one `pending` execution per template.
//! 4. Execute every execution whose template does not require approval,
//!    sequentially and in creation order.
//! 5. Roll the submission status up from the attempted executions.

use std::sync::Arc;

use idp_core::error::CoreError;
use idp_core::operations::runner::CommandRunner;
use idp_core::operations::status::SubmissionStatus;
use idp_core::types::DbId;
use idp_db::models::operation::CreateOperationExecution;
use serde::Serialize;

use crate::error::EngineResult;
use crate::executor::OperationExecutor;
use crate::store::OperationStore;

/// Summary of one [`SubmissionOrchestrator::process`] run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub submission_id: DbId,
    pub status: SubmissionStatus,
    /// IDs of the executions created, in creation order.
    pub execution_ids: Vec<DbId>,
    /// Executions run to a terminal status.
    pub attempted: usize,
    /// Attempted executions that ended `failed`.
    pub failed: usize,
    /// Executions left `pending` for approval.
    pub awaiting_approval: usize,
}

/// Creates and runs the executions for a submission.
pub struct SubmissionOrchestrator<S, R> {
    store: S,
    executor: Arc<OperationExecutor<S, R>>,
}

impl<S, R> SubmissionOrchestrator<S, R>
where
    S: OperationStore,
    R: CommandRunner,
{
    pub fn new(store: S, executor: Arc<OperationExecutor<S, R>>) -> Self {
        Self { store, executor }
    }

    /// Process a submission end to end.
    ///
    /// Errors loading the submission or its templates are returned to the
    /// caller; failures of individual executions only affect the rolled-up
    /// status.
    pub async fn process(&self, submission_id: DbId) -> EngineResult<SubmissionReport> {
        // 1. Load the submission and mark it processing.
        let submission = self
            .store
            .find_submission(submission_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "PanelSubmission",
                id: submission_id,
            })?;
        if !self
            .store
            .list_executions_for_submission(submission_id)
            .await?
            .is_empty()
        {
            return Err(CoreError::Conflict(format!(
                "Submission {submission_id} has already been processed"
            ))
            .into());
        }
        self.store
            .set_submission_status(submission_id, SubmissionStatus::Processing)
            .await?;

        // 2. Active templates for the panel.
        let templates = self.store.list_active_templates(submission.panel_id).await?;
        if templates.is_empty() {
            tracing::info!(submission_id, "No active templates for panel, nothing to run");
            self.store
                .set_submission_status(submission_id, SubmissionStatus::Completed)
                .await?;
            return Ok(SubmissionReport {
                submission_id,
                status: SubmissionStatus::Completed,
                execution_ids: Vec::new(),
                attempted: 0,
                failed: 0,
                awaiting_approval: 0,
            });
        }

        // 3. One pending execution per template.
        let mut planned = Vec::with_capacity(templates.len());
        for template in &templates {
            let execution = self
                .store
                .create_execution(CreateOperationExecution {
                    template_id: template.id,
                    submission_id,
                    user_id: submission.user_id,
                })
                .await?;
            planned.push((execution.id, template.requires_approval));
        }
        tracing::info!(
            submission_id,
            executions = planned.len(),
            "Created executions for submission",
        );

        // 4. Run everything that does not need approval.
        let mut attempted = 0;
        let mut failed = 0;
        let mut awaiting_approval = 0;
        for &(execution_id, requires_approval) in &planned {
            if requires_approval {
                awaiting_approval += 1;
                continue;
            }
            match self.executor.execute(execution_id).await {
                Ok(outcome) if outcome.attempted() => {
                    attempted += 1;
                    if !outcome.succeeded() {
                        failed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        submission_id,
                        execution_id,
                        error = %e,
                        "Execution could not be driven to completion",
                    );
                    attempted += 1;
                    failed += 1;
                }
            }
        }

        // 5. Roll up.
        let status = SubmissionStatus::from_outcomes(failed == 0);
        self.store
            .set_submission_status(submission_id, status)
            .await?;
        tracing::info!(
            submission_id,
            %status,
            attempted,
            failed,
            awaiting_approval,
            "Submission processed",
        );

        Ok(SubmissionReport {
            submission_id,
            status,
            execution_ids: planned.into_iter().map(|(id, _)| id).collect(),
            attempted,
            failed,
            awaiting_approval,
        })
    }
}
