//! Persistence seam for the engine.
//!
//! [`OperationStore`] is the only way the engine reads or writes records.
//! [`PgStore`] backs it with the `idp-db` repositories; [`MemoryStore`]
//! keeps everything in process for tests and local experiments.
//!
//! Status changes are conditional: methods returning `bool` report whether
//! the row actually moved, so a caller that loses a race can back off.

mod memory;
mod postgres;

use std::future::Future;

use idp_core::operations::retention::StaleRunPolicy;
use idp_core::operations::status::{ExecutionStatus, SubmissionStatus};
use idp_core::types::{DbId, Timestamp};
use idp_db::models::operation::{
    CreateOperationExecution, CreateOperationLog, FinishExecution, OperationExecution,
    OperationLog, OperationTemplate,
};
use idp_db::models::submission::PanelSubmission;

use crate::error::EngineResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage operations required by the engine.
pub trait OperationStore: Clone + Send + Sync + 'static {
    // -- Submissions --

    fn find_submission(
        &self,
        id: DbId,
    ) -> impl Future<Output = EngineResult<Option<PanelSubmission>>> + Send;

    fn set_submission_status(
        &self,
        id: DbId,
        status: SubmissionStatus,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    /// Move up to `limit` pending submissions to `processing` and return them.
    fn claim_pending_submissions(
        &self,
        limit: i64,
    ) -> impl Future<Output = EngineResult<Vec<DbId>>> + Send;

    /// Move `processing` submissions without executions back to `pending`.
    fn release_stranded_submissions(
        &self,
    ) -> impl Future<Output = EngineResult<Vec<DbId>>> + Send;

    // -- Templates --

    /// Active templates for a panel, ordered by name.
    fn list_active_templates(
        &self,
        panel_id: DbId,
    ) -> impl Future<Output = EngineResult<Vec<OperationTemplate>>> + Send;

    fn find_template(
        &self,
        id: DbId,
    ) -> impl Future<Output = EngineResult<Option<OperationTemplate>>> + Send;

    // -- Executions --

    fn create_execution(
        &self,
        dto: CreateOperationExecution,
    ) -> impl Future<Output = EngineResult<OperationExecution>> + Send;

    fn find_execution(
        &self,
        id: DbId,
    ) -> impl Future<Output = EngineResult<Option<OperationExecution>>> + Send;

    /// Record the rendered command while the execution has not started.
    fn set_executed_command(
        &self,
        id: DbId,
        command: &str,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    /// Move to `to` if the current status is one of `from`.
    fn transition(
        &self,
        id: DbId,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    /// Write a terminal status and output unless already terminal.
    fn finish_execution(
        &self,
        id: DbId,
        dto: FinishExecution,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    /// Approve a pending execution.
    fn approve_execution(
        &self,
        id: DbId,
        approver_id: DbId,
    ) -> impl Future<Output = EngineResult<bool>> + Send;

    fn list_executions_for_submission(
        &self,
        submission_id: DbId,
    ) -> impl Future<Output = EngineResult<Vec<OperationExecution>>> + Send;

    /// Most recent first, optionally restricted to one user.
    fn list_executions(
        &self,
        user_id: Option<DbId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> impl Future<Output = EngineResult<Vec<OperationExecution>>> + Send;

    fn list_execution_ids_with_status(
        &self,
        status: ExecutionStatus,
    ) -> impl Future<Output = EngineResult<Vec<DbId>>> + Send;

    // -- Logs --

    fn append_log(
        &self,
        dto: CreateOperationLog,
    ) -> impl Future<Output = EngineResult<OperationLog>> + Send;

    /// Logs for an execution, oldest first.
    fn list_logs(
        &self,
        execution_id: DbId,
    ) -> impl Future<Output = EngineResult<Vec<OperationLog>>> + Send;

    // -- Maintenance --

    /// Delete terminal executions (and their logs) created before `cutoff`.
    fn delete_terminal_older_than(
        &self,
        cutoff: Timestamp,
    ) -> impl Future<Output = EngineResult<u64>> + Send;

    /// Fail `running` executions that outlived `policy`'s threshold for
    /// their template.
    fn fail_stale_running(
        &self,
        now: Timestamp,
        policy: StaleRunPolicy,
        message: &str,
    ) -> impl Future<Output = EngineResult<Vec<DbId>>> + Send;
}
