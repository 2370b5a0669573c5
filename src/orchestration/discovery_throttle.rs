//! # Granule Discovery Throttle
//!
//! Bounds the page size handed to a discovery worker so paging stops once the
//! job's granule estimate is covered. The estimate may shrink between dispatches,
//! so the limit is recomputed every time.

use tracing::debug;

use crate::database::StoreTransaction;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{WorkItem, WorkflowStep};
use crate::state_machine::WorkItemStatus;

/// `clamp(0, max_page_size, estimated_total - successful_pages * max_page_size)`
pub fn discovery_page_limit(estimated_total: i64, successful_pages: i64, max_page_size: i64) -> i64 {
    let max_page_size = max_page_size.max(0);
    let remaining = estimated_total.saturating_sub(successful_pages.saturating_mul(max_page_size));
    remaining.max(0).min(max_page_size)
}

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryThrottle {
    max_page_size: i64,
}

impl DiscoveryThrottle {
    pub fn new(max_page_size: i64) -> Self {
        Self { max_page_size }
    }

    pub fn max_page_size(&self) -> i64 {
        self.max_page_size
    }

    /// Page limit for `item`, or `None` (unbounded) when its step is not discovery
    pub async fn limit_for(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &WorkItem,
        step: &WorkflowStep,
    ) -> OrchestratorResult<Option<i64>> {
        if !step.is_discovery() {
            return Ok(None);
        }
        let job = tx
            .get_job(item.job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(item.job_id))?;
        let successful = tx
            .work_item_count_for_step(
                item.job_id,
                item.workflow_step_index,
                &[WorkItemStatus::Successful],
            )
            .await?;

        let limit = discovery_page_limit(
            i64::from(job.num_input_granules),
            successful,
            self.max_page_size,
        );
        debug!(
            job_id = %item.job_id,
            work_item_id = item.id,
            limit,
            "Limited next discovery page"
        );
        Ok(Some(limit))
    }
}
