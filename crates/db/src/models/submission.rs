//! Panel submission model.
//!
//! Submissions are produced by the panel/form layer; the engine only reads
//! their parameter map and rolls their status up from child executions.

use idp_core::error::CoreError;
use idp_core::operations::builder::Parameters;
use idp_core::operations::status::{StatusId, SubmissionStatus};
use idp_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A user's filled-in form data for a panel.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PanelSubmission {
    pub id: DbId,
    pub panel_id: DbId,
    pub user_id: DbId,
    pub data: serde_json::Value,
    pub status_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PanelSubmission {
    /// Decoded status.
    pub fn status(&self) -> Result<SubmissionStatus, CoreError> {
        SubmissionStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Submission {} has unknown status id {}",
                self.id, self.status_id
            ))
        })
    }

    /// The submitted field values. Non-object payloads yield an empty map.
    pub fn parameters(&self) -> Parameters {
        match &self.data {
            serde_json::Value::Object(map) => map.clone(),
            _ => Parameters::new(),
        }
    }
}

/// DTO for inserting a submission (used by seeding and tests).
#[derive(Debug, Clone)]
pub struct CreatePanelSubmission {
    pub panel_id: DbId,
    pub user_id: DbId,
    pub data: serde_json::Value,
}
