//! Command safety filter.
//!
//! A string-level allow/deny filter applied to every rendered command before
//! a process is spawned. It is a baseline check, not a sandbox.
//!
//! Order of checks:
//! 1. deny-list substrings (on the lower-cased, trimmed command),
//! 2. allow-list of leading executables,
//! 3. maximum length.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Substrings that make a command unsafe wherever they appear.
pub const DENIED_PATTERNS: &[&str] = &[
    // Destructive filesystem operations.
    "rm -rf /",
    "dd if=",
    "mkfs",
    "fdisk",
    "format",
    "del /f /s /q",
    // Host control.
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    "init 0",
    "init 6",
    "kill -9 1",
    "killall",
    "pkill",
    // Privilege escalation.
    "chmod 777",
    "chown root",
    "sudo su",
    "su root",
    "> /dev/",
    "curl | sh",
    "wget | sh",
    "eval",
    "exec",
    // Shell chaining, substitution and redirection.
    "$()",
    "`",
    "&&",
    "||",
    ";",
    "|",
    ">",
    ">>",
    "<",
    "<<",
];

/// Executables a command may start with.
pub const ALLOWED_EXECUTABLES: &[&str] = &[
    "kubectl", "docker", "git", "terraform", "helm", "az", "aws", "gcloud", "echo", "cat", "ls",
    "pwd", "whoami", "date", "curl", "wget",
];

/// Maximum command length in characters.
pub const MAX_COMMAND_LENGTH: usize = 1000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum UnsafeCommand {
    #[error("command is empty")]
    Empty,

    #[error("command contains denied pattern '{pattern}'")]
    DeniedPattern { pattern: &'static str },

    #[error("executable '{executable}' is not in the allowed list")]
    ExecutableNotAllowed { executable: String },

    #[error("command is {length} characters long (maximum {max})")]
    TooLong { length: usize, max: usize },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a rendered command, returning the first reason it is unsafe.
pub fn check(command: &str) -> Result<(), UnsafeCommand> {
    let normalized = command.trim().to_lowercase();

    if let Some(pattern) = DENIED_PATTERNS
        .iter()
        .find(|pattern| normalized.contains(*pattern))
    {
        tracing::warn!(%command, pattern, "Dangerous command detected");
        return Err(UnsafeCommand::DeniedPattern { pattern });
    }

    let Some(executable) = normalized.split_whitespace().next() else {
        tracing::warn!("Empty command rejected");
        return Err(UnsafeCommand::Empty);
    };
    if !ALLOWED_EXECUTABLES.contains(&executable) {
        tracing::warn!(executable, "Command not in allowed list");
        return Err(UnsafeCommand::ExecutableNotAllowed {
            executable: executable.to_string(),
        });
    }

    let length = command.chars().count();
    if length > MAX_COMMAND_LENGTH {
        tracing::warn!(length, "Command too long");
        return Err(UnsafeCommand::TooLong {
            length,
            max: MAX_COMMAND_LENGTH,
        });
    }

    Ok(())
}

/// Whether `command` passes every check.
pub fn is_safe(command: &str) -> bool {
    check(command).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
