//! Operation engine entity models and DTOs.
//!
//! Models for the `operation_templates`, `operation_executions` and
//! `operation_logs` tables.

use std::time::Duration;

use idp_core::error::CoreError;
use idp_core::operations::kind::OperationKind;
use idp_core::operations::status::{ExecutionStatus, LogLevel, StatusId};
use idp_core::operations::DEFAULT_TIMEOUT_SECONDS;
use idp_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Operation templates
// ---------------------------------------------------------------------------

/// An operator-authored, parameterized command bound to a panel.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationTemplate {
    pub id: DbId,
    pub name: String,
    pub description: String,
    pub panel_id: DbId,
    pub operation_type: String,
    pub command_template: String,
    pub pre_execution_script: String,
    pub post_execution_script: String,
    pub timeout_seconds: i32,
    pub retry_count: i32,
    pub requires_approval: bool,
    pub environment_variables: serde_json::Value,
    pub required_secrets: serde_json::Value,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl OperationTemplate {
    /// Parsed operation type.
    pub fn kind(&self) -> Result<OperationKind, CoreError> {
        self.operation_type.parse()
    }

    /// Process timeout (at least one second).
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1) as u64)
    }

    /// Extra attempts allowed after a failed run.
    pub fn max_retries(&self) -> u32 {
        self.retry_count.max(0) as u32
    }

    /// Environment variables to set on the child process.
    ///
    /// Non-string JSON values are passed as their JSON text.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        match &self.environment_variables {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Names of the secrets the command needs in its environment.
    pub fn secret_keys(&self) -> Vec<String> {
        match &self.required_secrets {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// DTO for inserting a new operation template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperationTemplate {
    pub name: String,
    pub description: Option<String>,
    pub panel_id: DbId,
    pub operation_type: OperationKind,
    pub command_template: String,
    pub pre_execution_script: Option<String>,
    pub post_execution_script: Option<String>,
    pub timeout_seconds: Option<i32>,
    pub retry_count: Option<i32>,
    pub requires_approval: Option<bool>,
    pub environment_variables: Option<serde_json::Value>,
    pub required_secrets: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl CreateOperationTemplate {
    /// Minimal DTO with every optional field left to its default.
    pub fn new(
        name: impl Into<String>,
        panel_id: DbId,
        operation_type: OperationKind,
        command_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            panel_id,
            operation_type,
            command_template: command_template.into(),
            pre_execution_script: None,
            post_execution_script: None,
            timeout_seconds: None,
            retry_count: None,
            requires_approval: None,
            environment_variables: None,
            required_secrets: None,
            is_active: None,
        }
    }

    pub fn timeout_seconds_or_default(&self) -> i32 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    pub fn environment_variables_or_default(&self) -> serde_json::Value {
        self.environment_variables
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }

    pub fn required_secrets_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.required_secrets.clone().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Operation executions
// ---------------------------------------------------------------------------

/// One attempt to run a template against a submission's parameters.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationExecution {
    pub id: DbId,
    pub template_id: DbId,
    pub submission_id: DbId,
    pub user_id: DbId,
    pub status_id: StatusId,
    pub executed_command: String,
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub approved_by: Option<DbId>,
    pub approved_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl OperationExecution {
    /// Decoded status.
    pub fn status(&self) -> Result<ExecutionStatus, CoreError> {
        ExecutionStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Execution {} has unknown status id {}",
                self.id, self.status_id
            ))
        })
    }

    /// Wall-clock duration between start and completion, when both are set.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// DTO for creating a new execution record (always `pending`).
#[derive(Debug, Clone)]
pub struct CreateOperationExecution {
    pub template_id: DbId,
    pub submission_id: DbId,
    pub user_id: DbId,
}

/// Terminal write for an execution.
#[derive(Debug, Clone)]
pub struct FinishExecution {
    pub status: ExecutionStatus,
    pub output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
}

// ---------------------------------------------------------------------------
// Operation logs
// ---------------------------------------------------------------------------

/// Append-only log record for one execution.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationLog {
    pub id: DbId,
    pub execution_id: DbId,
    pub level_id: StatusId,
    pub message: String,
    pub timestamp: Timestamp,
}

impl OperationLog {
    pub fn level(&self) -> Option<LogLevel> {
        LogLevel::from_id(self.level_id)
    }
}

/// DTO for appending a log record.
#[derive(Debug, Clone)]
pub struct CreateOperationLog {
    pub execution_id: DbId,
    pub level: LogLevel,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
