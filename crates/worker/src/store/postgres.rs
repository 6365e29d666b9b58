//! [`OperationStore`] backed by PostgreSQL through the `idp-db` repositories.

use idp_core::operations::retention::StaleRunPolicy;
use idp_core::operations::status::{ExecutionStatus, SubmissionStatus};
use idp_core::types::{DbId, Timestamp};
use idp_db::models::operation::{
    CreateOperationExecution, CreateOperationLog, FinishExecution, OperationExecution,
    OperationLog, OperationTemplate,
};
use idp_db::models::submission::PanelSubmission;
use idp_db::repositories::{
    OperationExecutionRepo, OperationLogRepo, OperationTemplateRepo, SubmissionRepo,
};
use idp_db::DbPool;

use super::OperationStore;
use crate::error::EngineResult;

/// PostgreSQL-backed store. Cloning shares the underlying pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl OperationStore for PgStore {
    async fn find_submission(&self, id: DbId) -> EngineResult<Option<PanelSubmission>> {
        Ok(SubmissionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn set_submission_status(&self, id: DbId, status: SubmissionStatus) -> EngineResult<()> {
        Ok(SubmissionRepo::set_status(&self.pool, id, status).await?)
    }

    async fn claim_pending_submissions(&self, limit: i64) -> EngineResult<Vec<DbId>> {
        Ok(SubmissionRepo::claim_pending(&self.pool, limit).await?)
    }

    async fn release_stranded_submissions(&self) -> EngineResult<Vec<DbId>> {
        Ok(SubmissionRepo::release_stranded(&self.pool).await?)
    }

    async fn list_active_templates(&self, panel_id: DbId) -> EngineResult<Vec<OperationTemplate>> {
        Ok(OperationTemplateRepo::list_active_for_panel(&self.pool, panel_id).await?)
    }

    async fn find_template(&self, id: DbId) -> EngineResult<Option<OperationTemplate>> {
        Ok(OperationTemplateRepo::find_by_id(&self.pool, id).await?)
    }

    async fn create_execution(
        &self,
        dto: CreateOperationExecution,
    ) -> EngineResult<OperationExecution> {
        Ok(OperationExecutionRepo::create(&self.pool, &dto).await?)
    }

    async fn find_execution(&self, id: DbId) -> EngineResult<Option<OperationExecution>> {
        Ok(OperationExecutionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn set_executed_command(&self, id: DbId, command: &str) -> EngineResult<bool> {
        Ok(OperationExecutionRepo::set_executed_command(&self.pool, id, command).await?)
    }

    async fn transition(
        &self,
        id: DbId,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
    ) -> EngineResult<bool> {
        Ok(OperationExecutionRepo::transition(&self.pool, id, from, to).await?)
    }

    async fn finish_execution(&self, id: DbId, dto: FinishExecution) -> EngineResult<bool> {
        Ok(OperationExecutionRepo::finish(&self.pool, id, &dto).await?)
    }

    async fn approve_execution(&self, id: DbId, approver_id: DbId) -> EngineResult<bool> {
        Ok(OperationExecutionRepo::approve(&self.pool, id, approver_id).await?)
    }

    async fn list_executions_for_submission(
        &self,
        submission_id: DbId,
    ) -> EngineResult<Vec<OperationExecution>> {
        Ok(OperationExecutionRepo::list_for_submission(&self.pool, submission_id).await?)
    }

    async fn list_executions(
        &self,
        user_id: Option<DbId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> EngineResult<Vec<OperationExecution>> {
        Ok(OperationExecutionRepo::list(&self.pool, user_id, limit, offset).await?)
    }

    async fn list_execution_ids_with_status(
        &self,
        status: ExecutionStatus,
    ) -> EngineResult<Vec<DbId>> {
        Ok(OperationExecutionRepo::list_ids_with_status(&self.pool, status).await?)
    }

    async fn append_log(&self, dto: CreateOperationLog) -> EngineResult<OperationLog> {
        Ok(OperationLogRepo::create(&self.pool, &dto).await?)
    }

    async fn list_logs(&self, execution_id: DbId) -> EngineResult<Vec<OperationLog>> {
        Ok(OperationLogRepo::list_for_execution(&self.pool, execution_id).await?)
    }

    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> EngineResult<u64> {
        Ok(OperationExecutionRepo::delete_terminal_older_than(&self.pool, cutoff).await?)
    }

    async fn fail_stale_running(
        &self,
        now: Timestamp,
        policy: StaleRunPolicy,
        message: &str,
    ) -> EngineResult<Vec<DbId>> {
        Ok(OperationExecutionRepo::fail_stale_running(&self.pool, now, &policy, message).await?)
    }
}
