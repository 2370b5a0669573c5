//! # In-Memory Work Item Store
//!
//! Serialising store for tests and embedded use. A transaction takes the single
//! store lock for its whole lifetime and works on a private copy of the state;
//! `commit` writes the copy back, `rollback` or drop throws it away. One writer at a
//! time trivially satisfies every row-lock guarantee of the Postgres backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::{StoreTransaction, WorkItemStore};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{
    Job, JobError, JobLink, NewJob, NewJobError, NewJobLink, NewWorkItem, NewWorkflowStep,
    WorkItem, WorkflowStep,
};
use crate::state_machine::WorkItemStatus;

#[derive(Debug, Clone, Default)]
struct StoreState {
    jobs: HashMap<Uuid, Job>,
    steps: BTreeMap<(Uuid, i32), WorkflowStep>,
    work_items: BTreeMap<i64, WorkItem>,
    job_errors: Vec<JobError>,
    job_links: Vec<JobLink>,
    last_work_item_id: i64,
    last_job_error_id: i64,
    last_job_link_id: i64,
}

impl StoreState {
    fn job_is_terminal(&self, job_id: &Uuid) -> bool {
        self.jobs
            .get(job_id)
            .map(|job| job.status.is_terminal())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkItemStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkItemStore for InMemoryWorkItemStore {
    async fn begin(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_job(&mut self, job: NewJob) -> OrchestratorResult<Job> {
        if self.working.jobs.contains_key(&job.job_id) {
            return Err(OrchestratorError::ValidationError(format!(
                "Job {} already exists",
                job.job_id
            )));
        }
        let job = job.into_job(Utc::now());
        self.working.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&mut self, job_id: Uuid) -> OrchestratorResult<Option<Job>> {
        Ok(self.working.jobs.get(&job_id).cloned())
    }

    async fn lock_job(&mut self, job_id: Uuid) -> OrchestratorResult<Job> {
        self.working
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    async fn save_job(&mut self, job: &Job) -> OrchestratorResult<()> {
        let stored = self
            .working
            .jobs
            .get_mut(&job.job_id)
            .ok_or(OrchestratorError::JobNotFound(job.job_id))?;
        *stored = job.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_workflow_steps(
        &mut self,
        steps: Vec<NewWorkflowStep>,
    ) -> OrchestratorResult<Vec<WorkflowStep>> {
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(steps.len());
        for step in steps {
            let key = (step.job_id, step.step_index);
            if self.working.steps.contains_key(&key) {
                return Err(OrchestratorError::ValidationError(format!(
                    "Workflow step {} already exists for job {}",
                    step.step_index, step.job_id
                )));
            }
            let step = step.into_step(now);
            self.working.steps.insert(key, step.clone());
            inserted.push(step);
        }
        Ok(inserted)
    }

    async fn workflow_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
    ) -> OrchestratorResult<Option<WorkflowStep>> {
        Ok(self.working.steps.get(&(job_id, step_index)).cloned())
    }

    async fn workflow_steps(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<WorkflowStep>> {
        Ok(self
            .working
            .steps
            .range((job_id, i32::MIN)..=(job_id, i32::MAX))
            .map(|(_, step)| step.clone())
            .collect())
    }

    async fn save_workflow_step(&mut self, step: &WorkflowStep) -> OrchestratorResult<()> {
        let stored = self
            .working
            .steps
            .get_mut(&(step.job_id, step.step_index))
            .ok_or(OrchestratorError::WorkflowStepNotFound {
                job_id: step.job_id,
                step_index: step.step_index,
            })?;
        *stored = step.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn get_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<Option<WorkItem>> {
        Ok(self.working.work_items.get(&work_item_id).cloned())
    }

    async fn lock_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<WorkItem> {
        self.working
            .work_items
            .get(&work_item_id)
            .cloned()
            .ok_or(OrchestratorError::WorkItemNotFound(work_item_id))
    }

    async fn save_work_item(&mut self, item: &WorkItem) -> OrchestratorResult<()> {
        let stored = self
            .working
            .work_items
            .get_mut(&item.id)
            .ok_or(OrchestratorError::WorkItemNotFound(item.id))?;
        *stored = item.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_next_work_item(
        &mut self,
        service_id: &str,
    ) -> OrchestratorResult<Option<WorkItem>> {
        let state = &self.working;
        Ok(state
            .work_items
            .values()
            .filter(|item| item.service_id == service_id && item.status == WorkItemStatus::Ready)
            .find(|item| {
                state
                    .jobs
                    .get(&item.job_id)
                    .map(|job| job.status.is_dispatchable())
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn insert_work_items(
        &mut self,
        items: &[NewWorkItem],
    ) -> OrchestratorResult<Vec<WorkItem>> {
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            if !self.working.jobs.contains_key(&item.job_id) {
                return Err(OrchestratorError::JobNotFound(item.job_id));
            }
            self.working.last_work_item_id += 1;
            let item = item.clone().into_work_item(self.working.last_work_item_id, now);
            self.working.work_items.insert(item.id, item.clone());
            inserted.push(item);
        }
        Ok(inserted)
    }

    async fn work_item_count_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        statuses: &[WorkItemStatus],
    ) -> OrchestratorResult<i64> {
        let count = self
            .working
            .work_items
            .values()
            .filter(|item| {
                item.job_id == job_id
                    && item.workflow_step_index == step_index
                    && statuses.contains(&item.status)
            })
            .count();
        Ok(count as i64)
    }

    async fn work_items_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        page: i64,
        page_size: i64,
    ) -> OrchestratorResult<Vec<WorkItem>> {
        if page < 1 || page_size < 1 {
            return Err(OrchestratorError::ValidationError(format!(
                "Invalid page {page} with size {page_size}"
            )));
        }
        let offset = ((page - 1) * page_size) as usize;
        Ok(self
            .working
            .work_items
            .values()
            .filter(|item| item.job_id == job_id && item.workflow_step_index == step_index)
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn orphaned_work_item_ids(&mut self) -> OrchestratorResult<Vec<i64>> {
        let state = &self.working;
        Ok(state
            .work_items
            .values()
            .filter(|item| {
                matches!(item.status, WorkItemStatus::Ready | WorkItemStatus::Running)
                    && state.job_is_terminal(&item.job_id)
            })
            .map(|item| item.id)
            .collect())
    }

    async fn stale_running_work_item_ids(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<i64>> {
        let state = &self.working;
        Ok(state
            .work_items
            .values()
            .filter(|item| {
                item.status == WorkItemStatus::Running
                    && item.started_at.map(|t| t < started_before).unwrap_or(false)
                    && !state.job_is_terminal(&item.job_id)
            })
            .map(|item| item.id)
            .collect())
    }

    async fn add_job_error(&mut self, error: NewJobError) -> OrchestratorResult<JobError> {
        self.working.last_job_error_id += 1;
        let error = error.into_job_error(self.working.last_job_error_id, Utc::now());
        self.working.job_errors.push(error.clone());
        Ok(error)
    }

    async fn job_error_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
        Ok(self
            .working
            .job_errors
            .iter()
            .filter(|error| error.job_id == job_id)
            .count() as i64)
    }

    async fn job_errors(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobError>> {
        Ok(self
            .working
            .job_errors
            .iter()
            .filter(|error| error.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn add_job_links(&mut self, links: Vec<NewJobLink>) -> OrchestratorResult<Vec<JobLink>> {
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(links.len());
        for link in links {
            self.working.last_job_link_id += 1;
            let link = link.into_job_link(self.working.last_job_link_id, now);
            self.working.job_links.push(link.clone());
            inserted.push(link);
        }
        Ok(inserted)
    }

    async fn job_data_link_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
        Ok(self
            .working
            .job_links
            .iter()
            .filter(|link| link.job_id == job_id && link.rel == crate::constants::rels::DATA)
            .count() as i64)
    }

    async fn job_links(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobLink>> {
        Ok(self
            .working
            .job_links
            .iter()
            .filter(|link| link.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
        let InMemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
        Ok(())
    }
}
