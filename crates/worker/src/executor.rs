//! Runs a single operation execution from `pending`/`approved` to a terminal
//! status.
//!
//! Every path out of [`OperationExecutor::execute`] leaves the execution
//! either terminal or in a clean `pending`/`approved` hold. Stage errors after
//! the execution was loaded are caught and force the execution to `failed`
//! with the error text as `error_output`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use idp_core::error::CoreError;
use idp_core::operations::builder;
use idp_core::operations::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use idp_core::operations::runner::{CommandRunner, ProcessOutput, RunRequest};
use idp_core::operations::status::{ExecutionStatus, LogLevel, STARTABLE_STATUSES};
use idp_core::operations::validator;
use idp_core::types::DbId;
use idp_db::models::operation::{FinishExecution, OperationExecution, OperationTemplate};

use crate::config::WorkerConfig;
use crate::error::{EngineError, EngineResult};
use crate::logger::ExecutionLogger;
use crate::store::OperationStore;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where values for a template's `required_secrets` come from.
#[derive(Clone, Default)]
pub enum SecretSource {
    /// The worker's own process environment.
    #[default]
    ProcessEnv,
    /// A fixed map of secret values.
    Fixed(HashMap<String, String>),
}

impl SecretSource {
    pub fn resolve(&self, key: &str) -> Option<String> {
        match self {
            SecretSource::ProcessEnv => std::env::var(key).ok(),
            SecretSource::Fixed(values) => values.get(key).cloned(),
        }
    }
}

// Values are redacted.
impl std::fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::ProcessEnv => f.write_str("ProcessEnv"),
            SecretSource::Fixed(values) => f
                .debug_tuple("Fixed")
                .field(&values.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Knobs for [`OperationExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Scratch directory every command runs in.
    pub work_dir: PathBuf,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub secrets: SecretSource,
}

impl ExecutorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
            secrets: SecretSource::ProcessEnv,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            retry_base_delay: DEFAULT_BASE_DELAY,
            retry_max_delay: DEFAULT_MAX_DELAY,
            secrets: SecretSource::ProcessEnv,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What [`OperationExecutor::execute`] did with an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The execution reached `completed` or `failed` in this call.
    Finished {
        execution_id: DbId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        attempts: u32,
    },
    /// Left `pending` until a staff member approves it.
    AwaitingApproval { execution_id: DbId },
    /// Not started here: already terminal, already running, or claimed by
    /// someone else first.
    Skipped {
        execution_id: DbId,
        status: ExecutionStatus,
    },
}

impl ExecutionOutcome {
    pub fn execution_id(&self) -> DbId {
        match self {
            Self::Finished { execution_id, .. }
            | Self::AwaitingApproval { execution_id }
            | Self::Skipped { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this call ran (or tried to run) the execution to a terminal status.
    pub fn attempted(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    /// Whether the execution finished `completed` in this call.
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            Self::Finished {
                status: ExecutionStatus::Completed,
                ..
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Renders, validates and runs one execution, recording every step.
pub struct OperationExecutor<S, R> {
    store: S,
    runner: R,
    logger: ExecutionLogger<S>,
    settings: ExecutorSettings,
}

impl<S, R> OperationExecutor<S, R>
where
    S: OperationStore,
    R: CommandRunner,
{
    pub fn new(store: S, runner: R, settings: ExecutorSettings) -> Self {
        Self {
            logger: ExecutionLogger::new(store.clone()),
            store,
            runner,
            settings,
        }
    }

    pub fn logger(&self) -> &ExecutionLogger<S> {
        &self.logger
    }

    /// Drive one execution as far as it may go.
    ///
    /// Returns `Err` only when the execution cannot be loaded, or when forcing
    /// it to `failed` after a stage error itself fails.
    pub async fn execute(&self, execution_id: DbId) -> EngineResult<ExecutionOutcome> {
        // 1. Load the execution.
        let execution = self
            .store
            .find_execution(execution_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "OperationExecution",
                id: execution_id,
            })?;
        let status = execution.status()?;

        // 2. Only pending/approved executions can start.
        if !STARTABLE_STATUSES.contains(&status) {
            tracing::info!(execution_id, %status, "Execution is not startable, skipping");
            return Ok(ExecutionOutcome::Skipped {
                execution_id,
                status,
            });
        }

        match self.run_stages(&execution, status).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.force_fail(execution_id, err).await,
        }
    }

    async fn run_stages(
        &self,
        execution: &OperationExecution,
        status: ExecutionStatus,
    ) -> EngineResult<ExecutionOutcome> {
        let execution_id = execution.id;

        // 3. Load the template; hold executions that still need approval.
        let template = self
            .store
            .find_template(execution.template_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "OperationTemplate",
                id: execution.template_id,
            })?;
        if template.requires_approval && status != ExecutionStatus::Approved {
            tracing::info!(
                execution_id,
                template = %template.name,
                "Execution requires approval, leaving pending",
            );
            return Ok(ExecutionOutcome::AwaitingApproval { execution_id });
        }

        let submission = self
            .store
            .find_submission(execution.submission_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "PanelSubmission",
                id: execution.submission_id,
            })?;
        let params = submission.parameters();

        // 4. Render and record the command.
        let command = builder::render(&template.command_template, &params);
        if !self.store.set_executed_command(execution_id, &command).await? {
            return self.skipped(execution_id).await;
        }

        // 5. Validate before anything is spawned.
        validator::check(&command).map_err(|reason| EngineError::UnsafeCommand {
            command: command.clone(),
            reason,
        })?;
        let rendered = builder::build(&template.command_template, &params)?;
        let env_vars = self.environment_for(&template)?;

        // 6. Claim the execution. Losing the claim means another worker or a
        //    cancellation got there first.
        if !self
            .store
            .transition(execution_id, &STARTABLE_STATUSES, ExecutionStatus::Running)
            .await?
        {
            return self.skipped(execution_id).await;
        }
        self.logger
            .info(execution_id, format!("Starting operation: {command}"))
            .await?;

        // 7. Run, retrying failed attempts up to the template's retry count.
        let request = RunRequest {
            argv: rendered.argv,
            env_vars,
            working_directory: self.settings.work_dir.clone(),
            timeout: template.timeout(),
        };
        let policy = RetryPolicy::new(template.max_retries())
            .with_delays(self.settings.retry_base_delay, self.settings.retry_max_delay);
        let (output, attempts) = self.run_with_retries(execution_id, request, &policy).await?;

        // 8. Record the captured streams.
        if !output.stdout.is_empty() {
            self.logger
                .info(execution_id, format!("STDOUT: {}", output.stdout))
                .await?;
        }
        if !output.stderr.is_empty() {
            let level = if output.succeeded() {
                LogLevel::Warning
            } else {
                LogLevel::Error
            };
            self.logger
                .log(execution_id, level, format!("STDERR: {}", output.stderr))
                .await?;
        }

        // 9. Write the terminal status.
        let status = if output.succeeded() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        let exit_code = output.exit_code;
        let finished = self
            .store
            .finish_execution(
                execution_id,
                FinishExecution {
                    status,
                    output: output.stdout,
                    error_output: output.stderr,
                    exit_code: Some(exit_code),
                },
            )
            .await?;
        if !finished {
            tracing::warn!(execution_id, "Execution was finalized elsewhere while running");
            return self.skipped(execution_id).await;
        }

        if status == ExecutionStatus::Completed {
            self.logger
                .info(execution_id, "Operation completed successfully")
                .await?;
        } else {
            self.logger
                .error(
                    execution_id,
                    format!("Operation failed with exit code {exit_code}"),
                )
                .await?;
        }

        Ok(ExecutionOutcome::Finished {
            execution_id,
            status,
            exit_code: Some(exit_code),
            attempts,
        })
    }

    /// Template env vars plus resolved secrets. Secret values are never logged.
    fn environment_for(&self, template: &OperationTemplate) -> EngineResult<Vec<(String, String)>> {
        let mut env_vars = template.env_vars();
        for key in template.secret_keys() {
            let value = self
                .settings
                .secrets
                .resolve(&key)
                .ok_or_else(|| EngineError::MissingSecret(key.clone()))?;
            env_vars.push((key, value));
        }
        Ok(env_vars)
    }

    async fn run_with_retries(
        &self,
        execution_id: DbId,
        request: RunRequest,
        policy: &RetryPolicy,
    ) -> EngineResult<(ProcessOutput, u32)> {
        let mut attempt = 1;
        loop {
            let output = self.runner.run(request.clone()).await;
            tracing::debug!(
                execution_id,
                attempt,
                exit_code = output.exit_code,
                duration_ms = output.duration_ms,
                "Process finished",
            );
            if output.succeeded() || !policy.should_retry(attempt) {
                return Ok((output, attempt));
            }

            let delay = policy.delay_for(attempt);
            self.logger
                .warning(
                    execution_id,
                    format!(
                        "Attempt {attempt} of {} failed with exit code {}, retrying in {}ms",
                        policy.max_attempts(),
                        output.exit_code,
                        delay.as_millis(),
                    ),
                )
                .await?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn skipped(&self, execution_id: DbId) -> EngineResult<ExecutionOutcome> {
        let status = match self.store.find_execution(execution_id).await? {
            Some(execution) => execution.status()?,
            None => {
                return Err(CoreError::NotFound {
                    entity: "OperationExecution",
                    id: execution_id,
                }
                .into())
            }
        };
        tracing::info!(execution_id, %status, "Execution changed state concurrently, skipping");
        Ok(ExecutionOutcome::Skipped {
            execution_id,
            status,
        })
    }

    /// Force an execution to `failed` after a stage error.
    async fn force_fail(
        &self,
        execution_id: DbId,
        err: EngineError,
    ) -> EngineResult<ExecutionOutcome> {
        let message = err.to_string();
        tracing::error!(execution_id, error = %message, "Operation execution failed");

        let finished = self
            .store
            .finish_execution(
                execution_id,
                FinishExecution {
                    status: ExecutionStatus::Failed,
                    output: String::new(),
                    error_output: message.clone(),
                    exit_code: None,
                },
            )
            .await?;
        if !finished {
            return self.skipped(execution_id).await;
        }

        self.logger
            .log_best_effort(execution_id, LogLevel::Error, message)
            .await;
        Ok(ExecutionOutcome::Finished {
            execution_id,
            status: ExecutionStatus::Failed,
            exit_code: None,
            attempts: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use idp_core::operations::kind::OperationKind;
    use idp_core::operations::runner::{ProcessFailure, ProcessRunner};
    use idp_db::models::operation::{CreateOperationExecution, CreateOperationTemplate};
    use idp_db::models::submission::CreatePanelSubmission;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    /// Replays scripted outputs and records every request.
    #[derive(Clone, Default)]
    struct ScriptedRunner {
        outputs: Arc<Mutex<Vec<ProcessOutput>>>,
        requests: Arc<Mutex<Vec<RunRequest>>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<ProcessOutput>) -> Self {
            Self {
                outputs: Arc::new(Mutex::new(outputs)),
                requests: Arc::default(),
            }
        }

        fn requests(&self) -> Vec<RunRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run(&self, request: RunRequest) -> ProcessOutput {
            self.requests.lock().unwrap().push(request);
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                exited(0, "", "")
            } else {
                outputs.remove(0)
            }
        }
    }

    fn exited(code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 5,
            failure: None,
        }
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
            secrets: SecretSource::Fixed(HashMap::new()),
            ..ExecutorSettings::default()
        }
    }

    async fn setup(
        template: CreateOperationTemplate,
        data: serde_json::Value,
    ) -> (MemoryStore, DbId) {
        let store = MemoryStore::new();
        let template = store.insert_template(template);
        let submission = store.insert_submission(CreatePanelSubmission {
            panel_id: template.panel_id,
            user_id: 3,
            data,
        });
        let execution = store
            .create_execution(CreateOperationExecution {
                template_id: template.id,
                submission_id: submission.id,
                user_id: submission.user_id,
            })
            .await
            .unwrap();
        (store, execution.id)
    }

    fn echo_template() -> CreateOperationTemplate {
        CreateOperationTemplate::new("greet", 1, OperationKind::CustomScript, "echo {name}")
    }

    #[tokio::test]
    async fn successful_run_records_command_output_and_logs() {
        let (store, id) = setup(echo_template(), json!({"name": "world"})).await;
        let runner = ScriptedRunner::new(vec![exited(0, "world\n", "")]);
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert!(outcome.succeeded());

        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status().unwrap(), ExecutionStatus::Completed);
        assert_eq!(execution.executed_command, "echo world");
        assert_eq!(execution.output, "world\n");
        assert_eq!(execution.exit_code, Some(0));
        assert!(execution.started_at.is_some() && execution.completed_at.is_some());
        assert_eq!(runner.requests()[0].argv, vec!["echo", "world"]);

        let messages: Vec<_> = store
            .list_logs(id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Starting operation: echo world".to_string(),
                "STDOUT: world\n".to_string(),
                "Operation completed successfully".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unsafe_command_fails_without_spawning() {
        let (store, id) = setup(echo_template(), json!({"name": "x; rm -rf /"})).await;
        let runner = ScriptedRunner::default();
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert_matches!(
            outcome,
            ExecutionOutcome::Finished {
                status: ExecutionStatus::Failed,
                attempts: 0,
                ..
            }
        );
        assert!(runner.requests().is_empty());

        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.executed_command, "echo x; rm -rf /");
        assert!(execution
            .error_output
            .starts_with("Command failed security validation: echo x; rm -rf /"));
        let logs = store.list_logs(id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level(), Some(LogLevel::Error));
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_failure_with_synthetic_exit_code() {
        let (store, id) = setup(echo_template(), json!({"name": "slow"})).await;
        let timeout = ProcessOutput::synthetic(ProcessFailure::Timeout { elapsed_ms: 1_000 }, 1_000);
        let executor =
            OperationExecutor::new(store.clone(), ScriptedRunner::new(vec![timeout]), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert!(!outcome.succeeded());

        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status().unwrap(), ExecutionStatus::Failed);
        assert_eq!(execution.exit_code, Some(-1));
        assert_eq!(execution.error_output, "Command execution timed out after 1s");
    }

    #[tokio::test]
    async fn failed_attempts_are_retried_up_to_retry_count() {
        let mut template = echo_template();
        template.retry_count = Some(2);
        let (store, id) = setup(template, json!({"name": "flaky"})).await;
        let runner = ScriptedRunner::new(vec![exited(1, "", "boom"), exited(0, "ok", "")]);
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert_matches!(
            outcome,
            ExecutionOutcome::Finished {
                status: ExecutionStatus::Completed,
                attempts: 2,
                ..
            }
        );
        assert_eq!(runner.requests().len(), 2);
        let warnings = store
            .list_logs(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.level() == Some(LogLevel::Warning))
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn retries_stop_after_last_attempt() {
        let mut template = echo_template();
        template.retry_count = Some(1);
        let (store, id) = setup(template, json!({"name": "down"})).await;
        let runner = ScriptedRunner::new(vec![exited(2, "", "e1"), exited(3, "", "e2")]);
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert_matches!(
            outcome,
            ExecutionOutcome::Finished { exit_code: Some(3), attempts: 2, .. }
        );
        assert_eq!(runner.requests().len(), 2);
    }

    #[tokio::test]
    async fn approval_required_execution_is_held() {
        let mut template = echo_template();
        template.requires_approval = Some(true);
        let (store, id) = setup(template, json!({"name": "prod"})).await;
        let runner = ScriptedRunner::default();
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::AwaitingApproval { execution_id: id });
        assert!(runner.requests().is_empty());

        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status().unwrap(), ExecutionStatus::Pending);
        assert!(execution.executed_command.is_empty());
    }

    #[tokio::test]
    async fn cancelled_execution_is_skipped() {
        let (store, id) = setup(echo_template(), json!({"name": "x"})).await;
        store
            .transition(id, &STARTABLE_STATUSES, ExecutionStatus::Cancelled)
            .await
            .unwrap();
        let runner = ScriptedRunner::default();
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        let outcome = executor.execute(id).await.unwrap();
        assert_matches!(
            outcome,
            ExecutionOutcome::Skipped {
                status: ExecutionStatus::Cancelled,
                ..
            }
        );
        assert!(runner.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_secret_fails_without_spawning() {
        let mut template = echo_template();
        template.required_secrets = Some(vec!["IDP_TEST_TOKEN".to_string()]);
        let (store, id) = setup(template, json!({"name": "x"})).await;
        let runner = ScriptedRunner::default();
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings());

        executor.execute(id).await.unwrap();
        assert!(runner.requests().is_empty());
        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status().unwrap(), ExecutionStatus::Failed);
        assert_eq!(execution.error_output, "Missing required secret 'IDP_TEST_TOKEN'");
    }

    #[tokio::test]
    async fn secrets_and_env_vars_reach_the_process() {
        let mut template = echo_template();
        template.environment_variables = Some(json!({"REGION": "eu"}));
        template.required_secrets = Some(vec!["API_TOKEN".to_string()]);
        let (store, id) = setup(template, json!({"name": "x"})).await;
        let runner = ScriptedRunner::default();
        let mut settings = settings();
        settings.secrets =
            SecretSource::Fixed(HashMap::from([("API_TOKEN".to_string(), "s3cret".to_string())]));
        let executor = OperationExecutor::new(store.clone(), runner.clone(), settings);

        assert!(executor.execute(id).await.unwrap().succeeded());
        let env = &runner.requests()[0].env_vars;
        assert!(env.contains(&("REGION".to_string(), "eu".to_string())));
        assert!(env.contains(&("API_TOKEN".to_string(), "s3cret".to_string())));
        let logs = store.list_logs(id).await.unwrap();
        assert!(logs.iter().all(|l| !l.message.contains("s3cret")));
    }

    #[tokio::test]
    async fn malformed_template_fails() {
        let template =
            CreateOperationTemplate::new("broken", 1, OperationKind::Git, "git log '{ref}");
        let (store, id) = setup(template, json!({"ref": "main"})).await;
        let executor = OperationExecutor::new(store.clone(), ScriptedRunner::default(), settings());

        executor.execute(id).await.unwrap();
        let execution = store.find_execution(id).await.unwrap().unwrap();
        assert_eq!(execution.status().unwrap(), ExecutionStatus::Failed);
        assert!(execution.error_output.starts_with("Malformed command template"));
    }

    #[tokio::test]
    async fn unknown_execution_is_an_error() {
        let executor =
            OperationExecutor::new(MemoryStore::new(), ScriptedRunner::default(), settings());
        assert_matches!(
            executor.execute(999).await,
            Err(EngineError::Core(CoreError::NotFound { id: 999, .. }))
        );
    }

    #[tokio::test]
    async fn real_process_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let template = CreateOperationTemplate::new("where", 1, OperationKind::CustomScript, "pwd");
        let (store, id) = setup(template, json!({})).await;
        let mut settings = settings();
        settings.work_dir = dir.path().to_path_buf();
        let executor = OperationExecutor::new(store.clone(), ProcessRunner, settings);

        assert!(executor.execute(id).await.unwrap().succeeded());
        let execution = store.find_execution(id).await.unwrap().unwrap();
        let reported = std::path::Path::new(execution.output.trim())
            .canonicalize()
            .unwrap();
        assert_eq!(reported, dir.path().canonicalize().unwrap());
    }
}
