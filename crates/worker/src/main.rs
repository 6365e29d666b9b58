use std::sync::Arc;

use anyhow::Context;
use idp_core::operations::runner::ProcessRunner;
use idp_worker::config::{LogFormat, WorkerConfig};
use idp_worker::dispatcher::SubmissionDispatcher;
use idp_worker::executor::{ExecutorSettings, OperationExecutor};
use idp_worker::orchestrator::SubmissionOrchestrator;
use idp_worker::queue::{self, Worker};
use idp_worker::retention::RetentionSweeper;
use idp_worker::store::PgStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "idp_worker=debug,idp_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    tracing::info!(
        concurrency = config.concurrency,
        work_dir = %config.work_dir.display(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = idp_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    idp_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    idp_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let store = PgStore::new(pool);
    let (queue_handle, receiver) = queue::channel(config.queue_capacity);
    let executor = Arc::new(OperationExecutor::new(
        store.clone(),
        ProcessRunner,
        ExecutorSettings::from_config(&config),
    ));
    let orchestrator = Arc::new(SubmissionOrchestrator::new(
        store.clone(),
        Arc::clone(&executor),
    ));
    let worker = Worker::new(orchestrator, executor, receiver, config.concurrency);
    let dispatcher = SubmissionDispatcher::new(store.clone(), queue_handle)
        .with_poll_interval(config.poll_interval);
    let sweeper = RetentionSweeper::from_config(store, &config);

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });
    let sweeper_handle = tokio::spawn(sweeper.run(cancel.clone()));
    tracing::info!("Worker services started (worker, dispatcher, retention sweeper)");

    // --- Shutdown ---
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let (worker_result, dispatcher_result, sweeper_result) =
        tokio::join!(worker_handle, dispatcher_handle, sweeper_handle);
    for result in [worker_result, dispatcher_result, sweeper_result] {
        if let Err(e) = result {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }
    tracing::info!("Worker stopped");
    Ok(())
}
