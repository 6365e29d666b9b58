//! Persisted per-execution log stream.
//!
//! Every record is written to `operation_logs` through the store and mirrored
//! to `tracing` at the matching level, tagged with the execution ID.

use idp_core::operations::status::LogLevel;
use idp_core::types::DbId;
use idp_db::models::operation::{CreateOperationLog, OperationLog};

use crate::error::EngineResult;
use crate::store::OperationStore;

/// Appends log records for executions.
#[derive(Debug, Clone)]
pub struct ExecutionLogger<S> {
    store: S,
}

impl<S: OperationStore> ExecutionLogger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist one record and mirror it to tracing.
    pub async fn log(
        &self,
        execution_id: DbId,
        level: LogLevel,
        message: impl Into<String>,
    ) -> EngineResult<OperationLog> {
        let message = message.into();
        mirror(execution_id, level, &message);
        self.store
            .append_log(CreateOperationLog {
                execution_id,
                level,
                message,
            })
            .await
    }

    pub async fn info(&self, execution_id: DbId, message: impl Into<String>) -> EngineResult<()> {
        self.log(execution_id, LogLevel::Info, message).await.map(drop)
    }

    pub async fn warning(
        &self,
        execution_id: DbId,
        message: impl Into<String>,
    ) -> EngineResult<()> {
        self.log(execution_id, LogLevel::Warning, message).await.map(drop)
    }

    pub async fn error(&self, execution_id: DbId, message: impl Into<String>) -> EngineResult<()> {
        self.log(execution_id, LogLevel::Error, message).await.map(drop)
    }

    /// Like [`log`](Self::log), but a storage failure is only traced.
    ///
    /// Used on paths that are already handling another error.
    pub async fn log_best_effort(&self, execution_id: DbId, level: LogLevel, message: String) {
        if let Err(e) = self.log(execution_id, level, message).await {
            tracing::error!(execution_id, error = %e, "Failed to persist execution log");
        }
    }
}

fn mirror(execution_id: DbId, level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(execution_id, "{message}"),
        LogLevel::Info => tracing::info!(execution_id, "{message}"),
        LogLevel::Warning => tracing::warn!(execution_id, "{message}"),
        LogLevel::Error => tracing::error!(execution_id, "{message}"),
        LogLevel::Critical => tracing::error!(execution_id, critical = true, "{message}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn records_are_persisted_in_order() {
        let store = MemoryStore::new();
        let logger = ExecutionLogger::new(store.clone());

        logger.info(1, "Starting operation: echo hi").await.unwrap();
        logger.warning(1, "STDERR: careful").await.unwrap();
        logger
            .log(1, LogLevel::Critical, "Operation failed")
            .await
            .unwrap();
        logger.info(2, "other execution").await.unwrap();

        let logs = store.list_logs(1).await.unwrap();
        let levels: Vec<_> = logs.iter().filter_map(|l| l.level()).collect();
        assert_eq!(
            levels,
            vec![LogLevel::Info, LogLevel::Warning, LogLevel::Critical]
        );
        assert_eq!(logs[0].message, "Starting operation: echo hi");
        assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
