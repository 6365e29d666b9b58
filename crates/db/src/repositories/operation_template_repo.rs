//! Repository for the `operation_templates` table.

use idp_core::types::DbId;
use sqlx::PgPool;

use crate::models::operation::{CreateOperationTemplate, OperationTemplate};

/// Column list for `operation_templates` queries.
const COLUMNS: &str = "\
    id, name, description, panel_id, operation_type, command_template, \
    pre_execution_script, post_execution_script, \
    timeout_seconds, retry_count, requires_approval, \
    environment_variables, required_secrets, is_active, \
    created_at, updated_at";

/// Provides query operations for operation templates.
pub struct OperationTemplateRepo;

impl OperationTemplateRepo {
    /// Insert a new template, applying column defaults for omitted fields.
    pub async fn create(
        pool: &PgPool,
        dto: &CreateOperationTemplate,
    ) -> Result<OperationTemplate, sqlx::Error> {
        let query = format!(
            "INSERT INTO operation_templates \
                (name, description, panel_id, operation_type, command_template, \
                 pre_execution_script, post_execution_script, \
                 timeout_seconds, retry_count, requires_approval, \
                 environment_variables, required_secrets, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OperationTemplate>(&query)
            .bind(&dto.name)
            .bind(dto.description.as_deref().unwrap_or_default())
            .bind(dto.panel_id)
            .bind(dto.operation_type.as_str())
            .bind(&dto.command_template)
            .bind(dto.pre_execution_script.as_deref().unwrap_or_default())
            .bind(dto.post_execution_script.as_deref().unwrap_or_default())
            .bind(dto.timeout_seconds_or_default())
            .bind(dto.retry_count.unwrap_or(0))
            .bind(dto.requires_approval.unwrap_or(false))
            .bind(dto.environment_variables_or_default())
            .bind(dto.required_secrets_json())
            .bind(dto.is_active.unwrap_or(true))
            .fetch_one(pool)
            .await
    }

    /// Find a template by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<OperationTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM operation_templates WHERE id = $1");
        sqlx::query_as::<_, OperationTemplate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List the active templates bound to a panel, ordered by name.
    pub async fn list_active_for_panel(
        pool: &PgPool,
        panel_id: DbId,
    ) -> Result<Vec<OperationTemplate>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_templates \
             WHERE panel_id = $1 AND is_active \
             ORDER BY name ASC, id ASC"
        );
        sqlx::query_as::<_, OperationTemplate>(&query)
            .bind(panel_id)
            .fetch_all(pool)
            .await
    }
}
