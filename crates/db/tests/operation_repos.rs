//! Integration tests for the operation repositories.
//!
//! Need a PostgreSQL server: run with `DATABASE_URL=... cargo test -- --ignored`.

use chrono::{Duration, Utc};
use idp_core::operations::kind::OperationKind;
use idp_core::operations::retention::StaleRunPolicy;
use idp_core::operations::status::{
    ExecutionStatus, LogLevel, SubmissionStatus, STARTABLE_STATUSES,
};
use idp_core::types::DbId;
use idp_db::models::operation::{
    CreateOperationExecution, CreateOperationLog, CreateOperationTemplate, FinishExecution,
};
use idp_db::models::submission::CreatePanelSubmission;
use idp_db::repositories::{
    OperationExecutionRepo, OperationLogRepo, OperationTemplateRepo, SubmissionRepo,
};
use serde_json::json;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_user(pool: &PgPool, username: &str) -> DbId {
    sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
        .bind(username)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn seed_panel(pool: &PgPool) -> DbId {
    sqlx::query_scalar("INSERT INTO panels (title) VALUES ('Deploy') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Seed a user, panel, template and submission; return a fresh execution ID.
async fn seed_execution(pool: &PgPool) -> DbId {
    let user_id = seed_user(pool, "alice").await;
    let panel_id = seed_panel(pool).await;
    let template = OperationTemplateRepo::create(
        pool,
        &CreateOperationTemplate::new("list-pods", panel_id, OperationKind::Kubectl, "kubectl get pods"),
    )
    .await
    .unwrap();
    let submission = SubmissionRepo::create(
        pool,
        &CreatePanelSubmission {
            panel_id,
            user_id,
            data: json!({"ns": "default"}),
        },
    )
    .await
    .unwrap();
    OperationExecutionRepo::create(
        pool,
        &CreateOperationExecution {
            template_id: template.id,
            submission_id: submission.id,
            user_id,
        },
    )
    .await
    .unwrap()
    .id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn template_defaults_are_applied(pool: PgPool) {
    let panel_id = seed_panel(&pool).await;
    let template = OperationTemplateRepo::create(
        &pool,
        &CreateOperationTemplate::new("status", panel_id, OperationKind::Git, "git status"),
    )
    .await
    .unwrap();

    assert_eq!(template.timeout_seconds, 300);
    assert_eq!(template.retry_count, 0);
    assert!(!template.requires_approval);
    assert!(template.is_active);
    assert_eq!(template.kind().unwrap(), OperationKind::Git);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn claim_and_finish_lifecycle(pool: PgPool) {
    let id = seed_execution(&pool).await;

    assert!(OperationExecutionRepo::set_executed_command(&pool, id, "kubectl get pods")
        .await
        .unwrap());
    assert!(OperationExecutionRepo::transition(&pool, id, &STARTABLE_STATUSES, ExecutionStatus::Running)
        .await
        .unwrap());
    // A second claim loses.
    assert!(!OperationExecutionRepo::transition(&pool, id, &STARTABLE_STATUSES, ExecutionStatus::Running)
        .await
        .unwrap());

    let finish = FinishExecution {
        status: ExecutionStatus::Completed,
        output: "pod-a\n".to_string(),
        error_output: String::new(),
        exit_code: Some(0),
    };
    assert!(OperationExecutionRepo::finish(&pool, id, &finish).await.unwrap());
    assert!(!OperationExecutionRepo::finish(&pool, id, &finish).await.unwrap());

    let execution = OperationExecutionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(execution.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(execution.executed_command, "kubectl get pods");
    assert!(execution.duration_ms().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn approve_only_from_pending(pool: PgPool) {
    let id = seed_execution(&pool).await;
    let approver = seed_user(&pool, "admin").await;

    assert!(OperationExecutionRepo::approve(&pool, id, approver).await.unwrap());
    assert!(!OperationExecutionRepo::approve(&pool, id, approver).await.unwrap());

    let execution = OperationExecutionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(execution.status().unwrap(), ExecutionStatus::Approved);
    assert_eq!(execution.approved_by, Some(approver));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn retention_keeps_non_terminal_executions(pool: PgPool) {
    let completed = seed_execution(&pool).await;
    let row: (DbId, DbId, DbId) = sqlx::query_as(
        "SELECT template_id, submission_id, user_id FROM operation_executions WHERE id = $1",
    )
    .bind(completed)
    .fetch_one(&pool)
    .await
    .unwrap();
    let pending = OperationExecutionRepo::create(
        &pool,
        &CreateOperationExecution {
            template_id: row.0,
            submission_id: row.1,
            user_id: row.2,
        },
    )
    .await
    .unwrap()
    .id;

    OperationLogRepo::create(
        &pool,
        &CreateOperationLog {
            execution_id: completed,
            level: LogLevel::Info,
            message: "done".to_string(),
        },
    )
    .await
    .unwrap();
    OperationExecutionRepo::transition(&pool, completed, &STARTABLE_STATUSES, ExecutionStatus::Cancelled)
        .await
        .unwrap();
    sqlx::query("UPDATE operation_executions SET created_at = now() - interval '31 days'")
        .execute(&pool)
        .await
        .unwrap();

    let deleted = OperationExecutionRepo::delete_terminal_older_than(&pool, Utc::now() - Duration::days(30))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(OperationExecutionRepo::find_by_id(&pool, completed).await.unwrap().is_none());
    assert!(OperationLogRepo::list_for_execution(&pool, completed).await.unwrap().is_empty());
    assert!(OperationExecutionRepo::find_by_id(&pool, pending).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_running_executions_are_failed(pool: PgPool) {
    let id = seed_execution(&pool).await;
    OperationExecutionRepo::transition(&pool, id, &STARTABLE_STATUSES, ExecutionStatus::Running)
        .await
        .unwrap();
    // Default allowance: 300s * 1 attempt * factor 2.
    sqlx::query("UPDATE operation_executions SET started_at = now() - interval '11 minutes'")
        .execute(&pool)
        .await
        .unwrap();

    let policy = StaleRunPolicy::default();
    let failed = OperationExecutionRepo::fail_stale_running(&pool, Utc::now(), &policy, "abandoned")
        .await
        .unwrap();

    assert_eq!(failed, vec![id]);
    let execution = OperationExecutionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(execution.status().unwrap(), ExecutionStatus::Failed);
    assert_eq!(execution.exit_code, Some(-1));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_allowance_includes_retry_backoff(pool: PgPool) {
    let id = seed_execution(&pool).await;
    OperationExecutionRepo::transition(&pool, id, &STARTABLE_STATUSES, ExecutionStatus::Running)
        .await
        .unwrap();
    // 1s * 4 attempts * factor 2 + 1s + 2s + 4s of backoff = 15s.
    sqlx::query("UPDATE operation_templates SET timeout_seconds = 1, retry_count = 3")
        .execute(&pool)
        .await
        .unwrap();
    let policy = StaleRunPolicy::default();

    sqlx::query("UPDATE operation_executions SET started_at = now() - interval '12 seconds'")
        .execute(&pool)
        .await
        .unwrap();
    let failed = OperationExecutionRepo::fail_stale_running(&pool, Utc::now(), &policy, "abandoned")
        .await
        .unwrap();
    assert!(failed.is_empty());

    sqlx::query("UPDATE operation_executions SET started_at = now() - interval '20 seconds'")
        .execute(&pool)
        .await
        .unwrap();
    let failed = OperationExecutionRepo::fail_stale_running(&pool, Utc::now(), &policy, "abandoned")
        .await
        .unwrap();
    assert_eq!(failed, vec![id]);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn pending_submissions_are_claimed_once(pool: PgPool) {
    let user_id = seed_user(&pool, "bob").await;
    let panel_id = seed_panel(&pool).await;
    let submission = SubmissionRepo::create(
        &pool,
        &CreatePanelSubmission {
            panel_id,
            user_id,
            data: json!({}),
        },
    )
    .await
    .unwrap();

    assert_eq!(SubmissionRepo::claim_pending(&pool, 10).await.unwrap(), vec![submission.id]);
    assert!(SubmissionRepo::claim_pending(&pool, 10).await.unwrap().is_empty());

    let stored = SubmissionRepo::find_by_id(&pool, submission.id).await.unwrap().unwrap();
    assert_eq!(stored.status().unwrap(), SubmissionStatus::Processing);
}
