//! Status enums for executions, submissions and log records.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding lookup table (`execution_statuses`,
//! `submission_statuses`, `log_levels`).

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in seed order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up a variant by its database ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                Self::ALL.iter().copied().find(|s| s.id() == id)
            }

            /// Lower-case name as stored in the lookup table's `name` column.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Lifecycle of one operation execution attempt.
    ExecutionStatus {
        Pending = 1 => "pending",
        Approved = 2 => "approved",
        Running = 3 => "running",
        Completed = 4 => "completed",
        Failed = 5 => "failed",
        Cancelled = 6 => "cancelled",
    }
}

define_status_enum! {
    /// Aggregate status of a panel submission.
    SubmissionStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
    }
}

define_status_enum! {
    /// Severity of an operation log record.
    LogLevel {
        Debug = 1 => "debug",
        Info = 2 => "info",
        Warning = 3 => "warning",
        Error = 4 => "error",
        Critical = 5 => "critical",
    }
}

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [ExecutionStatus; 3] = [
    ExecutionStatus::Completed,
    ExecutionStatus::Failed,
    ExecutionStatus::Cancelled,
];

/// Statuses from which an execution may still be started or cancelled.
pub const STARTABLE_STATUSES: [ExecutionStatus; 2] =
    [ExecutionStatus::Pending, ExecutionStatus::Approved];

impl ExecutionStatus {
    /// Whether no further transitions are permitted.
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `pending`/`approved` may fail directly when the command is rejected
    /// before a process is spawned.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Approved, Running)
                | (Approved, Failed)
                | (Approved, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Statuses that may legally precede `next`.
    pub fn predecessors_of(next: ExecutionStatus) -> Vec<ExecutionStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl SubmissionStatus {
    /// Roll up the aggregate submission status from attempted executions.
    ///
    /// Approval-pending executions are not "attempted" and must not be passed
    /// here.
    pub fn from_outcomes(all_succeeded: bool) -> Self {
        if all_succeeded {
            SubmissionStatus::Completed
        } else {
            SubmissionStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
