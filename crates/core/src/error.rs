use crate::types::DbId;

/// Domain errors shared by every crate in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Malformed input, such as an unknown operation type.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The record is not in a status that allows the requested change.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The actor lacks permission (not staff, not the owner).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = CoreError::NotFound {
            entity: "OperationExecution",
            id: 42,
        };
        assert_eq!(
            err.to_string(),
            "Entity not found: OperationExecution with id 42"
        );
    }

    #[test]
    fn display_forbidden() {
        let err = CoreError::Forbidden("staff only".to_string());
        assert_eq!(err.to_string(), "Forbidden: staff only");
    }
}
