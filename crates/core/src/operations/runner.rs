//! Subprocess execution for rendered operation commands.
//!
//! Provides [`ProcessRunner`], which spawns an argument vector directly (no
//! shell), captures stdout/stderr, and enforces a hard timeout. Spawn, I/O
//! and timeout failures never surface as errors: they are folded into a
//! synthetic [`ProcessOutput`] with `exit_code = -1` so callers can update
//! execution state uniformly.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Per-stream capture limit (10 MiB). Output past it is read and discarded.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Exit code reported for timeouts and spawn failures.
pub const SYNTHETIC_EXIT_CODE: i32 = -1;

/// Input for a single process run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Scratch directory the child runs in.
    pub working_directory: PathBuf,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
}

/// Why a run did not produce a real exit status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessFailure {
    /// The process exceeded its timeout and was killed.
    #[error("Command execution timed out after {}s", .elapsed_ms / 1000)]
    Timeout { elapsed_ms: u64 },

    /// The OS refused to launch the process.
    #[error("Command execution error: {0}")]
    Spawn(String),

    /// Waiting on the process failed after it was spawned.
    #[error("Command execution error: {0}")]
    Io(String),
}

/// Captured result of a process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Process exit code (`-1` on timeout, spawn failure, or signal).
    pub exit_code: i32,
    /// Complete stdout captured from the process.
    pub stdout: String,
    /// Complete stderr, or the failure message for synthetic results.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Set when no real exit status was obtained.
    pub failure: Option<ProcessFailure>,
}

impl ProcessOutput {
    /// Build the synthetic result for a failed run.
    pub fn synthetic(failure: ProcessFailure, duration_ms: u64) -> Self {
        Self {
            exit_code: SYNTHETIC_EXIT_CODE,
            stdout: String::new(),
            stderr: failure.to_string(),
            duration_ms,
            failure: Some(failure),
        }
    }

    /// Whether the process exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.failure, Some(ProcessFailure::Timeout { .. }))
    }
}

/// Trait implemented by anything able to run a [`RunRequest`].
///
/// The engine is generic over this so tests can script process results.
pub trait CommandRunner: Send + Sync {
    /// Run the request to completion or timeout.
    fn run(
        &self,
        request: RunRequest,
    ) -> impl std::future::Future<Output = ProcessOutput> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, request: RunRequest) -> ProcessOutput {
        let started = Instant::now();
        match run_command(&request, started).await {
            Ok(output) => output,
            Err(failure) => ProcessOutput::synthetic(failure, elapsed_ms(started)),
        }
    }
}

/// Spawn the request's argv, capture stdout/stderr and enforce the timeout.
async fn run_command(
    request: &RunRequest,
    started: Instant,
) -> Result<ProcessOutput, ProcessFailure> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| ProcessFailure::Spawn("empty argument vector".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(request.env_vars.iter().map(|(k, v)| (k, v)))
        .current_dir(&request.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| ProcessFailure::Spawn(e.to_string()))?;

    // Drained concurrently with `wait` so a full pipe cannot stall the child.
    // Readers share the run's deadline: a grandchild holding a pipe open
    // cannot keep the run alive past its timeout.
    let deadline = tokio::time::Instant::now() + request.timeout;
    let stdout = tokio::spawn(capture(child.stdout.take(), deadline));
    let stderr = tokio::spawn(capture(child.stderr.take(), deadline));

    let waited = tokio::time::timeout_at(deadline, child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            stdout.abort();
            stderr.abort();
            return Err(ProcessFailure::Io(e.to_string()));
        }
        Err(_) => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "Failed to signal timed-out process");
            }
            let _ = child.wait().await;
            stdout.abort();
            stderr.abort();
            return Err(ProcessFailure::Timeout {
                elapsed_ms: elapsed_ms(started),
            });
        }
    };

    Ok(ProcessOutput {
        exit_code: status.code().unwrap_or(SYNTHETIC_EXIT_CODE),
        stdout: stdout.await.unwrap_or_default(),
        stderr: stderr.await.unwrap_or_default(),
        duration_ms: elapsed_ms(started),
        failure: None,
    })
}

/// Collect a child pipe as lossy UTF-8, keeping at most [`MAX_OUTPUT_BYTES`].
///
/// Bytes past the cap are read and discarded so the child never sees a
/// closed pipe. Reading stops at `deadline` with whatever was collected.
async fn capture<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    deadline: tokio::time::Instant,
) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut bytes = Vec::new();
    let drained = tokio::time::timeout_at(deadline, async {
        (&mut pipe)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut bytes)
            .await?;
        tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await
    })
    .await;
    match drained {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Output stream ended early"),
        Err(_) => tracing::warn!("Output stream still open at the run deadline"),
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
