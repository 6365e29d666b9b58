//! Repository for the append-only `operation_logs` table.

use idp_core::types::DbId;
use sqlx::PgPool;

use crate::models::operation::{CreateOperationLog, OperationLog};

/// Column list for `operation_logs` queries.
const COLUMNS: &str = "id, execution_id, level_id, message, \"timestamp\"";

/// Provides query operations for execution logs.
pub struct OperationLogRepo;

impl OperationLogRepo {
    /// Append a log record. The timestamp is taken from the database clock.
    pub async fn create(
        pool: &PgPool,
        dto: &CreateOperationLog,
    ) -> Result<OperationLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO operation_logs (execution_id, level_id, message) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(dto.execution_id)
            .bind(dto.level.id())
            .bind(&dto.message)
            .fetch_one(pool)
            .await
    }

    /// All log records for an execution, oldest first.
    pub async fn list_for_execution(
        pool: &PgPool,
        execution_id: DbId,
    ) -> Result<Vec<OperationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_logs \
             WHERE execution_id = $1 \
             ORDER BY \"timestamp\" ASC, id ASC"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(execution_id)
            .fetch_all(pool)
            .await
    }
}
