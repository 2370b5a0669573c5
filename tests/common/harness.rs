//! Orchestration core over the in-memory backends, plus builders for jobs and
//! their workflows and read helpers that open a short transaction per query.

#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use granule_orchestrator::catalog::InMemoryObjectStore;
use granule_orchestrator::config::OrchestratorConfig;
use granule_orchestrator::database::{InMemoryWorkItemStore, WorkItemStore};
use granule_orchestrator::models::{
    Job, JobError, JobLink, NewJob, NewWorkItem, NewWorkflowStep, StepRole, WorkItem, WorkflowStep,
};
use granule_orchestrator::orchestration::{GetWorkResponse, OrchestrationCore, UpdateOutcome};
use granule_orchestrator::WorkItemUpdate;

pub const ARTIFACT_ROOT: &str = "mem://artifacts";
pub const TEST_WORKER: &str = "test-worker";

/// Configuration with small pages and no dispatch back-off
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.artifacts.root = ARTIFACT_ROOT.to_string();
    config.discovery.max_page_size = 100;
    config.work_items.get_work_max_tries = 1;
    config.work_items.get_work_retry_delay_ms = 0;
    config.update_queue.redelivery_delay_ms = 10;
    config
}

#[derive(Debug, Clone, Copy)]
pub struct StepDef {
    pub service_id: &'static str,
    pub role: StepRole,
    pub aggregating: bool,
}

impl StepDef {
    pub fn discovery(service_id: &'static str) -> Self {
        Self {
            service_id,
            role: StepRole::Discovery,
            aggregating: false,
        }
    }

    pub fn service(service_id: &'static str) -> Self {
        Self {
            service_id,
            role: StepRole::Service,
            aggregating: false,
        }
    }

    pub fn aggregating(service_id: &'static str) -> Self {
        Self {
            service_id,
            role: StepRole::Service,
            aggregating: true,
        }
    }
}

/// A job as created by the harness
#[derive(Debug, Clone)]
pub struct TestJob {
    pub job_id: Uuid,
    pub steps: Vec<WorkflowStep>,
    /// READY items of the first step
    pub initial_items: Vec<WorkItem>,
}

pub struct TestHarness {
    pub config: OrchestratorConfig,
    pub store: Arc<InMemoryWorkItemStore>,
    pub object_store: Arc<InMemoryObjectStore>,
    pub core: OrchestrationCore,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryWorkItemStore::new());
        let object_store = Arc::new(InMemoryObjectStore::new());
        let core = OrchestrationCore::with_components(config.clone(), store.clone(), object_store.clone());
        Self {
            config,
            store,
            object_store,
            core,
        }
    }

    /// Create `job` with one workflow step per definition, indexed from 1.
    ///
    /// Expected counts follow the job's granule estimate. A workflow that starts
    /// with discovery gets one discovery item; otherwise the first step gets one
    /// item per input granule.
    pub async fn create_job(&self, job: NewJob, steps: &[StepDef]) -> TestJob {
        let page_size = self.config.discovery.max_page_size;
        let mut tx = self.store.begin().await.unwrap();
        let job = tx.insert_job(job).await.unwrap();

        let new_steps: Vec<NewWorkflowStep> = steps
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let mut step = NewWorkflowStep {
                    job_id: job.job_id,
                    step_index: index as i32 + 1,
                    service_id: def.service_id.to_string(),
                    role: def.role,
                    work_item_count: 0,
                    has_aggregated_output: def.aggregating,
                };
                step.work_item_count = step
                    .clone()
                    .into_step(Utc::now())
                    .expected_work_item_count(job.num_input_granules, page_size);
                step
            })
            .collect();
        let steps = tx.insert_workflow_steps(new_steps).await.unwrap();

        let first = &steps[0];
        let operation = serde_json::json!({ "format": "image/tiff", "job": job.job_id });
        let initial: Vec<NewWorkItem> = if first.is_discovery() {
            vec![NewWorkItem::new(job.job_id, first.service_id.clone(), first.step_index)
                .with_operation(operation)]
        } else {
            (0..job.num_input_granules)
                .map(|granule| {
                    NewWorkItem::new(job.job_id, first.service_id.clone(), first.step_index)
                        .with_catalog_location(format!(
                            "{ARTIFACT_ROOT}/inputs/{}/granule{granule}.json",
                            job.job_id
                        ))
                        .with_operation(operation.clone())
                })
                .collect()
        };
        let initial_items = tx.insert_work_items(&initial).await.unwrap();
        tx.commit().await.unwrap();

        TestJob {
            job_id: job.job_id,
            steps,
            initial_items,
        }
    }

    pub async fn handle(&self, update: WorkItemUpdate) -> UpdateOutcome {
        self.core.processor.handle_update(update).await.unwrap()
    }

    /// Claim the next item for `service_id`, panicking when there is none
    pub async fn dispatch(&self, service_id: &str) -> (WorkItem, Option<i64>) {
        match self
            .core
            .dispatcher
            .get_work(service_id, Some(TEST_WORKER))
            .await
            .unwrap()
        {
            GetWorkResponse::Work {
                work_item,
                max_granules,
            } => (work_item, max_granules),
            GetWorkResponse::NoWork => panic!("expected work for service {service_id}"),
        }
    }

    pub async fn has_work(&self, service_id: &str) -> bool {
        self.core
            .dispatcher
            .get_work(service_id, Some(TEST_WORKER))
            .await
            .unwrap()
            != GetWorkResponse::NoWork
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        let mut tx = self.store.begin().await.unwrap();
        let job = tx.get_job(job_id).await.unwrap().unwrap();
        tx.rollback().await.unwrap();
        job
    }

    pub async fn work_item(&self, work_item_id: i64) -> WorkItem {
        let mut tx = self.store.begin().await.unwrap();
        let item = tx.get_work_item(work_item_id).await.unwrap().unwrap();
        tx.rollback().await.unwrap();
        item
    }

    pub async fn steps(&self, job_id: Uuid) -> Vec<WorkflowStep> {
        let mut tx = self.store.begin().await.unwrap();
        let steps = tx.workflow_steps(job_id).await.unwrap();
        tx.rollback().await.unwrap();
        steps
    }

    pub async fn items_for_step(&self, job_id: Uuid, step_index: i32) -> Vec<WorkItem> {
        let mut tx = self.store.begin().await.unwrap();
        let items = tx
            .work_items_for_step(job_id, step_index, 1, 10_000)
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        items
    }

    pub async fn job_errors(&self, job_id: Uuid) -> Vec<JobError> {
        let mut tx = self.store.begin().await.unwrap();
        let errors = tx.job_errors(job_id).await.unwrap();
        tx.rollback().await.unwrap();
        errors
    }

    pub async fn job_links(&self, job_id: Uuid) -> Vec<JobLink> {
        let mut tx = self.store.begin().await.unwrap();
        let links = tx.job_links(job_id).await.unwrap();
        tx.rollback().await.unwrap();
        links
    }

    /// Persist direct changes to an item, for setting up timing scenarios
    pub async fn save_work_item(&self, item: &WorkItem) {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_work_item(item).await.unwrap();
        tx.commit().await.unwrap();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
