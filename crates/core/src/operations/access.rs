//! Approval and cancellation rules.
//!
//! Pure checks shared by the approval gate and the read-only projections.
//! Each returns a [`CoreError`] the caller can surface as a denial.

use crate::error::CoreError;
use crate::types::DbId;

use super::status::ExecutionStatus;

/// The identity performing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: DbId,
    pub is_staff: bool,
}

impl Actor {
    pub fn user(user_id: DbId) -> Self {
        Self {
            user_id,
            is_staff: false,
        }
    }

    pub fn staff(user_id: DbId) -> Self {
        Self {
            user_id,
            is_staff: true,
        }
    }

    /// Whether the actor may see or act on a record owned by `owner_id`.
    pub fn can_access(&self, owner_id: DbId) -> bool {
        self.is_staff || self.user_id == owner_id
    }
}

/// Only staff may approve, and only executions still `pending`.
pub fn ensure_can_approve(actor: &Actor, status: ExecutionStatus) -> Result<(), CoreError> {
    if !actor.is_staff {
        return Err(CoreError::Forbidden(
            "Only staff members can approve operations".to_string(),
        ));
    }
    if status != ExecutionStatus::Pending {
        return Err(CoreError::Conflict(format!(
            "Operation is not in pending status (current: {status})"
        )));
    }
    Ok(())
}

/// Owners and staff may cancel executions that have not started.
pub fn ensure_can_cancel(
    actor: &Actor,
    owner_id: DbId,
    status: ExecutionStatus,
) -> Result<(), CoreError> {
    if !actor.can_access(owner_id) {
        return Err(CoreError::Forbidden(
            "You can only cancel your own operations".to_string(),
        ));
    }
    if !status.can_transition_to(ExecutionStatus::Cancelled) {
        return Err(CoreError::Conflict(format!(
            "Operation cannot be cancelled in current status ({status})"
        )));
    }
    Ok(())
}

/// Owners and staff may read an execution and its logs.
pub fn ensure_can_view(actor: &Actor, owner_id: DbId) -> Result<(), CoreError> {
    if actor.can_access(owner_id) {
        Ok(())
    } else {
        Err(CoreError::Forbidden(
            "You can only view your own operations".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
