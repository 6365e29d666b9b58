#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use idp_core::operations::kind::OperationKind;
use idp_core::operations::runner::ProcessRunner;
use idp_core::types::DbId;
use idp_db::models::operation::{CreateOperationTemplate, OperationExecution, OperationTemplate};
use idp_db::models::submission::{CreatePanelSubmission, PanelSubmission};
use idp_worker::executor::{ExecutorSettings, OperationExecutor, SecretSource};
use idp_worker::orchestrator::SubmissionOrchestrator;
use idp_worker::queue::{self, handle_job, JobReceiver, QueueHandle};
use idp_worker::service::OperationService;
use idp_worker::store::{MemoryStore, OperationStore};

pub const PANEL: DbId = 1;
pub const OWNER: DbId = 10;
pub const OTHER_USER: DbId = 20;
pub const STAFF: DbId = 1;

/// Executor settings with millisecond retry delays and no secrets.
pub fn test_settings() -> ExecutorSettings {
    ExecutorSettings {
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(10),
        secrets: SecretSource::Fixed(HashMap::new()),
        ..ExecutorSettings::default()
    }
}

/// The whole engine wired over a [`MemoryStore`] and real processes.
pub struct Harness {
    pub store: MemoryStore,
    pub executor: Arc<OperationExecutor<MemoryStore, ProcessRunner>>,
    pub orchestrator: Arc<SubmissionOrchestrator<MemoryStore, ProcessRunner>>,
    pub service: OperationService<MemoryStore>,
    pub queue: QueueHandle,
    pub receiver: JobReceiver,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let (queue, receiver) = queue::channel(64);
        let executor = Arc::new(OperationExecutor::new(
            store.clone(),
            ProcessRunner,
            test_settings(),
        ));
        let orchestrator = Arc::new(SubmissionOrchestrator::new(
            store.clone(),
            Arc::clone(&executor),
        ));
        let service = OperationService::new(store.clone(), queue.clone());
        Self {
            store,
            executor,
            orchestrator,
            service,
            queue,
            receiver,
        }
    }

    pub fn template(&self, name: &str, command: &str) -> OperationTemplate {
        self.store.insert_template(CreateOperationTemplate::new(
            name,
            PANEL,
            OperationKind::CustomScript,
            command,
        ))
    }

    pub fn approval_template(&self, name: &str, command: &str) -> OperationTemplate {
        let mut dto = CreateOperationTemplate::new(name, PANEL, OperationKind::Kubectl, command);
        dto.requires_approval = Some(true);
        self.store.insert_template(dto)
    }

    pub fn submission(&self, data: serde_json::Value) -> PanelSubmission {
        self.store.insert_submission(CreatePanelSubmission {
            panel_id: PANEL,
            user_id: OWNER,
            data,
        })
    }

    pub async fn execution(&self, id: DbId) -> OperationExecution {
        self.store
            .find_execution(id)
            .await
            .unwrap()
            .expect("execution exists")
    }

    pub async fn submission_status(&self, id: DbId) -> idp_core::operations::status::SubmissionStatus {
        self.store
            .find_submission(id)
            .await
            .unwrap()
            .expect("submission exists")
            .status()
            .unwrap()
    }

    /// Run every job currently queued, in order. Returns how many ran.
    pub async fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            handle_job(&*self.orchestrator, &*self.executor, job).await;
            ran += 1;
        }
        ran
    }
}
