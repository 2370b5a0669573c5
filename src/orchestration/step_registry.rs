//! # Workflow Step Registry
//!
//! Expected work item counts per step. Counts are corrected when discovery learns
//! the real granule total and when a permanent failure removes a granule from the
//! pipeline; the job is finished once the final step has completed as many items as
//! it still expects.

use tracing::{debug, info};
use uuid::Uuid;

use crate::database::StoreTransaction;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{Job, WorkflowStep};
use crate::state_machine::COMPLETED_WORK_ITEM_STATUSES;

#[derive(Debug, Clone, Copy)]
pub struct StepRegistry {
    discovery_page_size: i64,
}

impl StepRegistry {
    pub fn new(discovery_page_size: i64) -> Self {
        Self {
            discovery_page_size,
        }
    }

    pub async fn step(
        &self,
        tx: &mut dyn StoreTransaction,
        job_id: Uuid,
        step_index: i32,
    ) -> OrchestratorResult<WorkflowStep> {
        tx.workflow_step(job_id, step_index)
            .await?
            .ok_or(OrchestratorError::WorkflowStepNotFound { job_id, step_index })
    }

    /// Recompute every step's expected count from the job's granule estimate
    pub async fn recompute_work_item_counts(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &Job,
    ) -> OrchestratorResult<()> {
        for mut step in tx.workflow_steps(job.job_id).await? {
            let expected =
                step.expected_work_item_count(job.num_input_granules, self.discovery_page_size);
            if expected != step.work_item_count {
                debug!(
                    job_id = %job.job_id,
                    step_index = step.step_index,
                    from = step.work_item_count,
                    to = expected,
                    "Recomputed expected work item count"
                );
                step.work_item_count = expected;
                tx.save_workflow_step(&step).await?;
            }
        }
        Ok(())
    }

    /// One granule of `failed_step` will never arrive downstream.
    ///
    /// Later steps expect one fewer item, up to but excluding the first aggregating
    /// step, which still runs over whatever its predecessor produced. When the failed
    /// step itself aggregates, nothing downstream can ever be produced.
    pub async fn remove_failed_granule(
        &self,
        tx: &mut dyn StoreTransaction,
        failed_step: &WorkflowStep,
    ) -> OrchestratorResult<()> {
        let downstream = tx
            .workflow_steps(failed_step.job_id)
            .await?
            .into_iter()
            .filter(|step| step.step_index > failed_step.step_index);

        for mut step in downstream {
            if failed_step.has_aggregated_output {
                step.work_item_count = 0;
            } else if step.has_aggregated_output {
                break;
            } else {
                step.work_item_count = (step.work_item_count - 1).max(0);
            }
            tx.save_workflow_step(&step).await?;
        }
        info!(
            job_id = %failed_step.job_id,
            step_index = failed_step.step_index,
            "Removed failed granule from downstream expected counts"
        );
        Ok(())
    }

    /// Whether the step's completed item count has reached its expected count
    pub async fn is_step_complete(
        &self,
        tx: &mut dyn StoreTransaction,
        step: &WorkflowStep,
    ) -> OrchestratorResult<bool> {
        let completed = tx
            .work_item_count_for_step(step.job_id, step.step_index, &COMPLETED_WORK_ITEM_STATUSES)
            .await?;
        Ok(completed >= i64::from(step.work_item_count))
    }

    /// Whether every chain of the job has ended
    pub async fn is_job_finished(
        &self,
        tx: &mut dyn StoreTransaction,
        job_id: Uuid,
    ) -> OrchestratorResult<bool> {
        let steps = tx.workflow_steps(job_id).await?;
        match steps.last() {
            Some(final_step) => self.is_step_complete(tx, final_step).await,
            None => Ok(true),
        }
    }
}
