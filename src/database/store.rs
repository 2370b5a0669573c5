//! # Work Item Store
//!
//! Transactional access to jobs, workflow steps, work items, job errors and job
//! links. Orchestration logic is written once against [`StoreTransaction`]; the
//! backends decide how row locks are taken.
//!
//! ## Locking contract
//!
//! - `lock_job` and `lock_work_item` hold the row until commit or rollback.
//! - Callers lock the job before any of its work items, never the reverse.
//! - `claim_next_work_item` skips rows held by other transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OrchestratorResult;
use crate::models::{
    Job, JobError, JobLink, NewJob, NewJobError, NewJobLink, NewWorkItem, NewWorkflowStep,
    WorkItem, WorkflowStep,
};
use crate::state_machine::WorkItemStatus;

/// Entry point to a transactional store
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn begin(&self) -> OrchestratorResult<Box<dyn StoreTransaction>>;
}

/// One open transaction. Dropping it without `commit` discards every change.
#[async_trait]
pub trait StoreTransaction: Send {
    // Jobs

    async fn insert_job(&mut self, job: NewJob) -> OrchestratorResult<Job>;

    async fn get_job(&mut self, job_id: Uuid) -> OrchestratorResult<Option<Job>>;

    /// Read and lock a job row
    async fn lock_job(&mut self, job_id: Uuid) -> OrchestratorResult<Job>;

    async fn save_job(&mut self, job: &Job) -> OrchestratorResult<()>;

    // Workflow steps

    async fn insert_workflow_steps(
        &mut self,
        steps: Vec<NewWorkflowStep>,
    ) -> OrchestratorResult<Vec<WorkflowStep>>;

    async fn workflow_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
    ) -> OrchestratorResult<Option<WorkflowStep>>;

    /// All steps of a job ordered by index
    async fn workflow_steps(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<WorkflowStep>>;

    async fn save_workflow_step(&mut self, step: &WorkflowStep) -> OrchestratorResult<()>;

    // Work items

    async fn get_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<Option<WorkItem>>;

    /// Read and lock a work item row
    async fn lock_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<WorkItem>;

    async fn save_work_item(&mut self, item: &WorkItem) -> OrchestratorResult<()>;

    /// Lock the oldest READY item for a service whose job accepts dispatch
    async fn claim_next_work_item(&mut self, service_id: &str)
        -> OrchestratorResult<Option<WorkItem>>;

    /// Insert new READY items in one bulk statement
    async fn insert_work_items(&mut self, items: &[NewWorkItem])
        -> OrchestratorResult<Vec<WorkItem>>;

    async fn work_item_count_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        statuses: &[WorkItemStatus],
    ) -> OrchestratorResult<i64>;

    /// Page of a step's items ordered by id; `page` starts at 1
    async fn work_items_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        page: i64,
        page_size: i64,
    ) -> OrchestratorResult<Vec<WorkItem>>;

    /// READY or RUNNING items whose job is terminal
    async fn orphaned_work_item_ids(&mut self) -> OrchestratorResult<Vec<i64>>;

    /// RUNNING items dispatched before the cutoff, on non-terminal jobs
    async fn stale_running_work_item_ids(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<i64>>;

    // Job errors and links

    async fn add_job_error(&mut self, error: NewJobError) -> OrchestratorResult<JobError>;

    async fn job_error_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64>;

    async fn job_errors(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobError>>;

    async fn add_job_links(&mut self, links: Vec<NewJobLink>) -> OrchestratorResult<Vec<JobLink>>;

    /// Number of links with rel "data"
    async fn job_data_link_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64>;

    async fn job_links(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobLink>>;

    async fn commit(self: Box<Self>) -> OrchestratorResult<()>;

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()>;
}
