//! Repository for the `panel_submissions` table.

use idp_core::operations::status::SubmissionStatus;
use idp_core::types::DbId;
use sqlx::PgPool;

use crate::models::submission::{CreatePanelSubmission, PanelSubmission};

/// Column list for `panel_submissions` queries.
const COLUMNS: &str = "id, panel_id, user_id, data, status_id, created_at, updated_at";

/// Provides query operations for panel submissions.
pub struct SubmissionRepo;

impl SubmissionRepo {
    /// Insert a new `pending` submission.
    pub async fn create(
        pool: &PgPool,
        dto: &CreatePanelSubmission,
    ) -> Result<PanelSubmission, sqlx::Error> {
        let query = format!(
            "INSERT INTO panel_submissions (panel_id, user_id, data, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PanelSubmission>(&query)
            .bind(dto.panel_id)
            .bind(dto.user_id)
            .bind(&dto.data)
            .bind(SubmissionStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find a submission by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<PanelSubmission>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM panel_submissions WHERE id = $1");
        sqlx::query_as::<_, PanelSubmission>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Overwrite the aggregate status.
    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        status: SubmissionStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE panel_submissions SET status_id = $2 WHERE id = $1")
            .bind(id)
            .bind(status.id())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Claim up to `limit` pending submissions by moving them to `processing`.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent pollers never claim the
    /// same submission. Returns the claimed IDs, oldest first.
    pub async fn claim_pending(pool: &PgPool, limit: i64) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE panel_submissions SET status_id = $1 \
             WHERE id IN ( \
                 SELECT id FROM panel_submissions \
                 WHERE status_id = $2 \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id",
        )
        .bind(SubmissionStatus::Processing.id())
        .bind(SubmissionStatus::Pending.id())
        .bind(limit.max(1))
        .fetch_all(pool)
        .await
        .map(|mut ids: Vec<DbId>| {
            ids.sort_unstable();
            ids
        })
    }

    /// Return `processing` submissions that have no executions to `pending`.
    ///
    /// Such a submission was claimed but its job never ran (the worker
    /// stopped first), so the next claim picks it up again. Returns the
    /// released IDs.
    pub async fn release_stranded(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE panel_submissions s SET status_id = $1 \
             WHERE s.status_id = $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM operation_executions e WHERE e.submission_id = s.id \
               ) \
             RETURNING s.id",
        )
        .bind(SubmissionStatus::Pending.id())
        .bind(SubmissionStatus::Processing.id())
        .fetch_all(pool)
        .await
        .map(|mut ids: Vec<DbId>| {
            ids.sort_unstable();
            ids
        })
    }
}
