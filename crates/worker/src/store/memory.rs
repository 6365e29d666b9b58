//! In-process [`OperationStore`] used by tests and local experiments.
//!
//! Mirrors the conditional-update semantics of the PostgreSQL repositories.
//! A single mutex guards every table; it is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use idp_core::operations::retention::StaleRunPolicy;
use idp_core::operations::status::{ExecutionStatus, SubmissionStatus};
use idp_core::types::{DbId, Timestamp};
use idp_db::models::operation::{
    CreateOperationExecution, CreateOperationLog, CreateOperationTemplate, FinishExecution,
    OperationExecution, OperationLog, OperationTemplate,
};
use idp_db::models::submission::{CreatePanelSubmission, PanelSubmission};

use super::OperationStore;
use crate::error::EngineResult;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default)]
struct Tables {
    next_id: DbId,
    submissions: Vec<PanelSubmission>,
    templates: Vec<OperationTemplate>,
    executions: Vec<OperationExecution>,
    logs: Vec<OperationLog>,
}

impl Tables {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn execution_mut(&mut self, id: DbId) -> Option<&mut OperationExecution> {
        self.executions.iter_mut().find(|e| e.id == id)
    }
}

fn status_of(execution: &OperationExecution) -> Option<ExecutionStatus> {
    ExecutionStatus::from_id(execution.status_id)
}

/// Shared in-memory tables. Cloning shares the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a template, applying the same defaults as the database.
    pub fn insert_template(&self, dto: CreateOperationTemplate) -> OperationTemplate {
        let mut tables = self.lock();
        let now = Utc::now();
        let template = OperationTemplate {
            id: tables.next_id(),
            timeout_seconds: dto.timeout_seconds_or_default(),
            environment_variables: dto.environment_variables_or_default(),
            required_secrets: dto.required_secrets_json(),
            name: dto.name,
            description: dto.description.unwrap_or_default(),
            panel_id: dto.panel_id,
            operation_type: dto.operation_type.as_str().to_string(),
            command_template: dto.command_template,
            pre_execution_script: dto.pre_execution_script.unwrap_or_default(),
            post_execution_script: dto.post_execution_script.unwrap_or_default(),
            retry_count: dto.retry_count.unwrap_or(0),
            requires_approval: dto.requires_approval.unwrap_or(false),
            is_active: dto.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        tables.templates.push(template.clone());
        template
    }

    /// Insert a `pending` submission.
    pub fn insert_submission(&self, dto: CreatePanelSubmission) -> PanelSubmission {
        let mut tables = self.lock();
        let now = Utc::now();
        let submission = PanelSubmission {
            id: tables.next_id(),
            panel_id: dto.panel_id,
            user_id: dto.user_id,
            data: dto.data,
            status_id: SubmissionStatus::Pending.id(),
            created_at: now,
            updated_at: now,
        };
        tables.submissions.push(submission.clone());
        submission
    }

    /// Apply `f` to a stored execution. Returns `false` if it does not exist.
    pub fn update_execution(&self, id: DbId, f: impl FnOnce(&mut OperationExecution)) -> bool {
        match self.lock().execution_mut(id) {
            Some(execution) => {
                f(execution);
                true
            }
            None => false,
        }
    }

    /// Number of log records stored for an execution.
    pub fn log_count(&self, execution_id: DbId) -> usize {
        self.lock()
            .logs
            .iter()
            .filter(|log| log.execution_id == execution_id)
            .count()
    }
}

impl OperationStore for MemoryStore {
    async fn find_submission(&self, id: DbId) -> EngineResult<Option<PanelSubmission>> {
        Ok(self.lock().submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn set_submission_status(&self, id: DbId, status: SubmissionStatus) -> EngineResult<()> {
        if let Some(submission) = self.lock().submissions.iter_mut().find(|s| s.id == id) {
            submission.status_id = status.id();
            submission.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn claim_pending_submissions(&self, limit: i64) -> EngineResult<Vec<DbId>> {
        let mut tables = self.lock();
        let limit = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
        let claimed = tables
            .submissions
            .iter_mut()
            .filter(|s| s.status_id == SubmissionStatus::Pending.id())
            .take(limit)
            .map(|s| {
                s.status_id = SubmissionStatus::Processing.id();
                s.id
            })
            .collect();
        Ok(claimed)
    }

    async fn release_stranded_submissions(&self) -> EngineResult<Vec<DbId>> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let mut released = Vec::new();
        for submission in tables.submissions.iter_mut() {
            let stranded = submission.status_id == SubmissionStatus::Processing.id()
                && !tables
                    .executions
                    .iter()
                    .any(|e| e.submission_id == submission.id);
            if stranded {
                submission.status_id = SubmissionStatus::Pending.id();
                submission.updated_at = Utc::now();
                released.push(submission.id);
            }
        }
        Ok(released)
    }

    async fn list_active_templates(&self, panel_id: DbId) -> EngineResult<Vec<OperationTemplate>> {
        let mut templates: Vec<_> = self
            .lock()
            .templates
            .iter()
            .filter(|t| t.panel_id == panel_id && t.is_active)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(templates)
    }

    async fn find_template(&self, id: DbId) -> EngineResult<Option<OperationTemplate>> {
        Ok(self.lock().templates.iter().find(|t| t.id == id).cloned())
    }

    async fn create_execution(
        &self,
        dto: CreateOperationExecution,
    ) -> EngineResult<OperationExecution> {
        let mut tables = self.lock();
        let now = Utc::now();
        let execution = OperationExecution {
            id: tables.next_id(),
            template_id: dto.template_id,
            submission_id: dto.submission_id,
            user_id: dto.user_id,
            status_id: ExecutionStatus::Pending.id(),
            executed_command: String::new(),
            output: String::new(),
            error_output: String::new(),
            exit_code: None,
            started_at: None,
            completed_at: None,
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.executions.push(execution.clone());
        Ok(execution)
    }

    async fn find_execution(&self, id: DbId) -> EngineResult<Option<OperationExecution>> {
        Ok(self.lock().executions.iter().find(|e| e.id == id).cloned())
    }

    async fn set_executed_command(&self, id: DbId, command: &str) -> EngineResult<bool> {
        let mut tables = self.lock();
        let Some(execution) = tables.execution_mut(id) else {
            return Ok(false);
        };
        match status_of(execution) {
            Some(status) if status.can_transition_to(ExecutionStatus::Running) => {
                execution.executed_command = command.to_string();
                execution.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(
        &self,
        id: DbId,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
    ) -> EngineResult<bool> {
        let mut tables = self.lock();
        let Some(execution) = tables.execution_mut(id) else {
            return Ok(false);
        };
        if !status_of(execution).is_some_and(|s| from.contains(&s)) {
            return Ok(false);
        }
        let now = Utc::now();
        execution.status_id = to.id();
        execution.updated_at = now;
        if to == ExecutionStatus::Running {
            execution.started_at = Some(now);
        }
        if to.is_terminal() {
            execution.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn finish_execution(&self, id: DbId, dto: FinishExecution) -> EngineResult<bool> {
        let mut tables = self.lock();
        let Some(execution) = tables.execution_mut(id) else {
            return Ok(false);
        };
        if status_of(execution).map_or(true, ExecutionStatus::is_terminal) {
            return Ok(false);
        }
        let now = Utc::now();
        execution.status_id = dto.status.id();
        execution.output = dto.output;
        execution.error_output = dto.error_output;
        execution.exit_code = dto.exit_code;
        execution.completed_at = Some(now);
        execution.updated_at = now;
        Ok(true)
    }

    async fn approve_execution(&self, id: DbId, approver_id: DbId) -> EngineResult<bool> {
        let mut tables = self.lock();
        let Some(execution) = tables.execution_mut(id) else {
            return Ok(false);
        };
        if status_of(execution) != Some(ExecutionStatus::Pending) {
            return Ok(false);
        }
        let now = Utc::now();
        execution.status_id = ExecutionStatus::Approved.id();
        execution.approved_by = Some(approver_id);
        execution.approved_at = Some(now);
        execution.updated_at = now;
        Ok(true)
    }

    async fn list_executions_for_submission(
        &self,
        submission_id: DbId,
    ) -> EngineResult<Vec<OperationExecution>> {
        Ok(self
            .lock()
            .executions
            .iter()
            .filter(|e| e.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn list_executions(
        &self,
        user_id: Option<DbId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> EngineResult<Vec<OperationExecution>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;
        let offset = offset.unwrap_or(0).max(0) as usize;
        let mut executions: Vec<_> = self
            .lock()
            .executions
            .iter()
            .filter(|e| user_id.map_or(true, |uid| e.user_id == uid))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(executions.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_execution_ids_with_status(
        &self,
        status: ExecutionStatus,
    ) -> EngineResult<Vec<DbId>> {
        Ok(self
            .lock()
            .executions
            .iter()
            .filter(|e| e.status_id == status.id())
            .map(|e| e.id)
            .collect())
    }

    async fn append_log(&self, dto: CreateOperationLog) -> EngineResult<OperationLog> {
        let mut tables = self.lock();
        let log = OperationLog {
            id: tables.next_id(),
            execution_id: dto.execution_id,
            level_id: dto.level.id(),
            message: dto.message,
            timestamp: Utc::now(),
        };
        tables.logs.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, execution_id: DbId) -> EngineResult<Vec<OperationLog>> {
        let mut logs: Vec<_> = self
            .lock()
            .logs
            .iter()
            .filter(|log| log.execution_id == execution_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(logs)
    }

    async fn delete_terminal_older_than(&self, cutoff: Timestamp) -> EngineResult<u64> {
        let mut tables = self.lock();
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut tables.executions)
            .into_iter()
            .partition(|e| {
                e.created_at < cutoff && status_of(e).is_some_and(ExecutionStatus::is_terminal)
            });
        tables.executions = kept;
        tables
            .logs
            .retain(|log| !expired.iter().any(|e| e.id == log.execution_id));
        Ok(expired.len() as u64)
    }

    async fn fail_stale_running(
        &self,
        now: Timestamp,
        policy: StaleRunPolicy,
        message: &str,
    ) -> EngineResult<Vec<DbId>> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let mut failed = Vec::new();
        for execution in tables.executions.iter_mut() {
            if status_of(execution) != Some(ExecutionStatus::Running) {
                continue;
            }
            let (Some(started_at), Some(template)) = (
                execution.started_at,
                tables.templates.iter().find(|t| t.id == execution.template_id),
            ) else {
                continue;
            };
            let threshold = policy.threshold(template.timeout_seconds, template.retry_count);
            if started_at < now - threshold {
                execution.status_id = ExecutionStatus::Failed.id();
                execution.error_output = message.to_string();
                execution.exit_code.get_or_insert(-1);
                execution.completed_at = Some(Utc::now());
                failed.push(execution.id);
            }
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
