//! # Failure Policy
//!
//! Decides what a permanent item failure (retries exhausted) does to its job. A
//! discovery failure, a job that does not ignore errors and an exhausted error
//! budget all fail the job; otherwise the failure is recorded as a job error and
//! the granule is dropped from the downstream expected counts.

use std::sync::Arc;
use tracing::{error, warn};

use super::job_finalizer::JobFinalizer;
use super::step_registry::StepRegistry;
use crate::catalog::{read_catalog_items, ObjectStore};
use crate::constants::messages;
use crate::database::StoreTransaction;
use crate::error::OrchestratorResult;
use crate::models::{Job, NewJobError, WorkItem, WorkflowStep};
use crate::state_machine::{JobEvent, JobStatus, WorkItemStatus};

/// Whether processing of the update continues after the policy ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Continue,
    /// The job was completed as FAILED
    JobFailed,
}

impl FailureDecision {
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Resource URL for a failed item: the data asset of the first item in its input
/// catalog, or "unknown" when the catalog cannot be read.
pub async fn failed_item_url(store: &dyn ObjectStore, item: &WorkItem) -> String {
    let Some(location) = &item.catalog_location else {
        return messages::UNKNOWN_URL.to_string();
    };
    match read_catalog_items(store, location).await {
        Ok(items) => items
            .first()
            .and_then(|first| first.data_asset())
            .map(|asset| asset.href.clone())
            .unwrap_or_else(|| messages::UNKNOWN_URL.to_string()),
        Err(e) => {
            error!(
                work_item_id = item.id,
                catalog_location = %location,
                error = %e,
                "Could not read catalog for failed work item"
            );
            messages::UNKNOWN_URL.to_string()
        }
    }
}

#[derive(Clone)]
pub struct FailurePolicy {
    object_store: Arc<dyn ObjectStore>,
    finalizer: JobFinalizer,
    registry: StepRegistry,
    max_errors_for_job: i64,
}

impl std::fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailurePolicy")
            .field("max_errors_for_job", &self.max_errors_for_job)
            .finish_non_exhaustive()
    }
}

impl FailurePolicy {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        finalizer: JobFinalizer,
        registry: StepRegistry,
        max_errors_for_job: i64,
    ) -> Self {
        Self {
            object_store,
            finalizer,
            registry,
            max_errors_for_job,
        }
    }

    /// Apply the policy for an item that finished with `status`.
    ///
    /// Anything other than FAILED continues untouched.
    pub async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
        item: &WorkItem,
        step: &WorkflowStep,
        status: WorkItemStatus,
        error_message: Option<&str>,
    ) -> OrchestratorResult<FailureDecision> {
        if status != WorkItemStatus::Failed {
            return Ok(FailureDecision::Continue);
        }
        if job.is_complete() {
            return Ok(FailureDecision::JobFailed);
        }

        let mut proceed = job.ignore_errors;
        let mut message = error_message.map(|e| messages::work_item_failed(item.id, e));

        if step.is_discovery() {
            proceed = false;
            if message.is_none() {
                message = Some(messages::discovery_failed(item.id));
            }
        } else {
            let url = failed_item_url(self.object_store.as_ref(), item).await;
            let error_message = message
                .clone()
                .unwrap_or_else(|| messages::unknown_failure(item.id));
            tx.add_job_error(NewJobError {
                job_id: job.job_id,
                url,
                message: error_message.clone(),
            })
            .await?;
            message = Some(error_message);
        }

        if proceed {
            let error_count = tx.job_error_count(job.job_id).await?;
            if error_count > self.max_errors_for_job {
                warn!(
                    job_id = %job.job_id,
                    error_count,
                    max_errors = self.max_errors_for_job,
                    "Job exceeded its error budget"
                );
                message = Some(messages::max_errors_exceeded(self.max_errors_for_job));
                proceed = false;
            }
        }

        if !proceed {
            self.finalizer
                .complete_job(tx, job, JobStatus::Failed, message)
                .await?;
            return Ok(FailureDecision::JobFailed);
        }

        self.registry.remove_failed_granule(tx, step).await?;
        job.apply(JobEvent::RecordError)?;
        tx.save_job(job).await?;
        Ok(FailureDecision::Continue)
    }
}
