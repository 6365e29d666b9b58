use idp_core::error::CoreError;
use idp_core::operations::builder::TemplateError;
use idp_core::operations::validator::UnsafeCommand;

/// Errors raised while driving submissions and executions.
///
/// Inside a single execution every variant ends in a `failed` status with
/// the error text recorded as `error_output`. At the orchestration level the
/// error is reported to the queue and never retried.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A domain-level error (not found, forbidden, conflict, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The rendered command was rejected before any process was spawned.
    #[error("Command failed security validation: {command} ({reason})")]
    UnsafeCommand {
        command: String,
        reason: UnsafeCommand,
    },

    /// The template could not be split into an argument vector.
    #[error("Malformed command template: {0}")]
    MalformedTemplate(#[from] TemplateError),

    /// A secret listed in `required_secrets` is not available to the worker.
    #[error("Missing required secret '{0}'")]
    MissingSecret(String),

    /// The job queue is closed or full.
    #[error("Queue error: {0}")]
    Queue(String),
}

/// Convenience alias used across the worker crate.
pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
