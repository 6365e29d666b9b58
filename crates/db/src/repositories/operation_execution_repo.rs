//! Repository for the `operation_executions` table.
//!
//! Every status change is a conditional update guarded by the set of legal
//! predecessor statuses. Callers receive `true` only when the row actually
//! moved, which is how a redelivered job detects that another worker already
//! claimed, finished or cancelled the execution.

use idp_core::operations::retention::{StaleRunPolicy, MAX_STALE_SECONDS};
use idp_core::operations::status::{ExecutionStatus, StatusId, TERMINAL_STATUSES};
use idp_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::operation::{CreateOperationExecution, FinishExecution, OperationExecution};

/// Column list for `operation_executions` queries.
const COLUMNS: &str = "\
    id, template_id, submission_id, user_id, status_id, \
    executed_command, output, error_output, exit_code, \
    started_at, completed_at, approved_by, approved_at, \
    created_at, updated_at";

/// Maximum page size for execution listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for execution listing.
const DEFAULT_LIMIT: i64 = 50;

fn status_ids(statuses: &[ExecutionStatus]) -> Vec<StatusId> {
    statuses.iter().map(|s| s.id()).collect()
}

fn millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Provides query operations for operation executions.
pub struct OperationExecutionRepo;

impl OperationExecutionRepo {
    /// Create a new execution record with status `pending` and an empty command.
    pub async fn create(
        pool: &PgPool,
        dto: &CreateOperationExecution,
    ) -> Result<OperationExecution, sqlx::Error> {
        let query = format!(
            "INSERT INTO operation_executions (template_id, submission_id, user_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OperationExecution>(&query)
            .bind(dto.template_id)
            .bind(dto.submission_id)
            .bind(dto.user_id)
            .bind(ExecutionStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find an execution by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<OperationExecution>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM operation_executions WHERE id = $1");
        sqlx::query_as::<_, OperationExecution>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Record the rendered command. Only allowed before the execution starts.
    pub async fn set_executed_command(
        pool: &PgPool,
        id: DbId,
        command: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE operation_executions SET executed_command = $2 \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(command)
        .bind(status_ids(&ExecutionStatus::predecessors_of(
            ExecutionStatus::Running,
        )))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move an execution to `to` if its current status is one of `from`.
    ///
    /// Entering `running` stamps `started_at`; entering a terminal status
    /// stamps `completed_at`.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE operation_executions SET \
                status_id = $2, \
                started_at = CASE WHEN $4 THEN now() ELSE started_at END, \
                completed_at = CASE WHEN $5 THEN now() ELSE completed_at END \
             WHERE id = $1 AND status_id = ANY($3)",
        )
        .bind(id)
        .bind(to.id())
        .bind(status_ids(from))
        .bind(to == ExecutionStatus::Running)
        .bind(to.is_terminal())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the terminal status and captured output.
    ///
    /// No-op (returns `false`) if the execution is already terminal.
    pub async fn finish(
        pool: &PgPool,
        id: DbId,
        dto: &FinishExecution,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE operation_executions SET \
                status_id = $2, \
                output = $3, \
                error_output = $4, \
                exit_code = $5, \
                completed_at = now() \
             WHERE id = $1 AND NOT (status_id = ANY($6))",
        )
        .bind(id)
        .bind(dto.status.id())
        .bind(&dto.output)
        .bind(&dto.error_output)
        .bind(dto.exit_code)
        .bind(status_ids(&TERMINAL_STATUSES))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Approve a `pending` execution, recording who approved it and when.
    pub async fn approve(
        pool: &PgPool,
        id: DbId,
        approver_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE operation_executions SET \
                status_id = $2, approved_by = $3, approved_at = now() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(ExecutionStatus::Approved.id())
        .bind(approver_id)
        .bind(ExecutionStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Executions created for a submission, in creation order.
    pub async fn list_for_submission(
        pool: &PgPool,
        submission_id: DbId,
    ) -> Result<Vec<OperationExecution>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_executions \
             WHERE submission_id = $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, OperationExecution>(&query)
            .bind(submission_id)
            .fetch_all(pool)
            .await
    }

    /// List executions, most recent first, optionally restricted to one user.
    pub async fn list(
        pool: &PgPool,
        user_id: Option<DbId>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<OperationExecution>, sqlx::Error> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        let query = format!(
            "SELECT {COLUMNS} FROM operation_executions \
             WHERE ($1::BIGINT IS NULL OR user_id = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, OperationExecution>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Delete terminal executions created before `cutoff`.
    ///
    /// Logs are removed by `ON DELETE CASCADE`. Returns the number of
    /// executions deleted.
    pub async fn delete_terminal_older_than(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM operation_executions \
             WHERE created_at < $1 AND status_id = ANY($2)",
        )
        .bind(cutoff)
        .bind(status_ids(&TERMINAL_STATUSES))
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fail executions stuck in `running` longer than their template allows.
    ///
    /// The allowance matches [`StaleRunPolicy::threshold`]: every attempt's
    /// `timeout_seconds` times `factor`, plus the backoff sleeps between
    /// attempts, capped at [`MAX_STALE_SECONDS`]. Returns the IDs of the
    /// executions that were failed.
    pub async fn fail_stale_running(
        pool: &PgPool,
        now: Timestamp,
        policy: &StaleRunPolicy,
        message: &str,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE operation_executions e SET \
                status_id = $1, \
                error_output = $2, \
                exit_code = COALESCE(e.exit_code, -1), \
                completed_at = now() \
             FROM operation_templates t \
             WHERE e.template_id = t.id \
               AND e.status_id = $3 \
               AND e.started_at < $4 - make_interval(secs => LEAST( \
                   GREATEST(t.timeout_seconds, 1)::DOUBLE PRECISION \
                   * (GREATEST(t.retry_count, 0) + 1) \
                   * GREATEST($5::BIGINT, 1)::DOUBLE PRECISION \
                   + (COALESCE(( \
                         SELECT SUM(LEAST( \
                             $6::BIGINT * power(2::DOUBLE PRECISION, (g - 1)::DOUBLE PRECISION), \
                             $7::BIGINT::DOUBLE PRECISION)) \
                         FROM generate_series(1, LEAST(GREATEST(t.retry_count, 0), 31)) AS g \
                     ), 0) \
                     + GREATEST(t.retry_count - 31, 0) * LEAST( \
                         $6::BIGINT * power(2::DOUBLE PRECISION, 31::DOUBLE PRECISION), \
                         $7::BIGINT::DOUBLE PRECISION)) / 1000.0, \
                   $8::BIGINT::DOUBLE PRECISION)) \
             RETURNING e.id",
        )
        .bind(ExecutionStatus::Failed.id())
        .bind(message)
        .bind(ExecutionStatus::Running.id())
        .bind(now)
        .bind(policy.factor)
        .bind(millis(policy.retry_base_delay))
        .bind(millis(policy.retry_max_delay))
        .bind(MAX_STALE_SECONDS)
        .fetch_all(pool)
        .await
    }

    /// IDs of every execution currently in `status`, oldest first.
    pub async fn list_ids_with_status(
        pool: &PgPool,
        status: ExecutionStatus,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM operation_executions WHERE status_id = $1 ORDER BY id ASC",
        )
        .bind(status.id())
        .fetch_all(pool)
        .await
    }
}
