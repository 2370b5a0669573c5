//! # Work Dispatcher
//!
//! Hands the oldest READY work item for a service to a polling worker. The item is
//! claimed with a skip-locked row lock, so two callers never receive the same item.
//! Discovery items come with the current page limit.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::discovery_throttle::DiscoveryThrottle;
use super::step_registry::StepRegistry;
use crate::config::OrchestratorConfig;
use crate::database::{StoreTransaction, WorkItemStore};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::WorkItem;
use crate::state_machine::{JobEvent, JobStatus, WorkItemEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GetWorkResponse {
    Work {
        work_item: WorkItem,
        /// Page limit for discovery items, absent for every other service
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_granules: Option<i64>,
    },
    NoWork,
}

impl GetWorkResponse {
    pub fn work_item(&self) -> Option<&WorkItem> {
        match self {
            Self::Work { work_item, .. } => Some(work_item),
            Self::NoWork => None,
        }
    }
}

#[derive(Clone)]
pub struct WorkDispatcher {
    store: Arc<dyn WorkItemStore>,
    registry: StepRegistry,
    throttle: DiscoveryThrottle,
    max_tries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for WorkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkDispatcher")
            .field("max_tries", &self.max_tries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl WorkDispatcher {
    pub fn new(store: Arc<dyn WorkItemStore>, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            registry: StepRegistry::new(config.discovery.max_page_size),
            throttle: DiscoveryThrottle::new(config.discovery.max_page_size),
            max_tries: config.work_items.get_work_max_tries.max(1),
            retry_delay: config.work_items.get_work_retry_delay(),
        }
    }

    /// Poll for work, waiting `retry_delay` between attempts
    #[instrument(skip(self))]
    pub async fn get_work(
        &self,
        service_id: &str,
        caller: Option<&str>,
    ) -> OrchestratorResult<GetWorkResponse> {
        for attempt in 1..=self.max_tries {
            if let Some(response) = self.try_dispatch(service_id).await? {
                if let Some(item) = response.work_item() {
                    info!(
                        job_id = %item.job_id,
                        work_item_id = item.id,
                        caller = caller.unwrap_or("unknown"),
                        "Dispatched work item"
                    );
                }
                return Ok(response);
            }
            if attempt < self.max_tries {
                debug!(attempt, "No work available, waiting before retry");
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Ok(GetWorkResponse::NoWork)
    }

    async fn try_dispatch(&self, service_id: &str) -> OrchestratorResult<Option<GetWorkResponse>> {
        let mut tx = self.store.begin().await?;
        match self.claim(tx.as_mut(), service_id).await {
            Ok(Some(response)) => {
                tx.commit().await?;
                Ok(Some(response))
            }
            Ok(None) => {
                tx.rollback().await?;
                Ok(None)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed dispatch also failed");
                }
                Err(e)
            }
        }
    }

    async fn claim(
        &self,
        tx: &mut dyn StoreTransaction,
        service_id: &str,
    ) -> OrchestratorResult<Option<GetWorkResponse>> {
        let Some(mut item) = tx.claim_next_work_item(service_id).await? else {
            return Ok(None);
        };

        let job = tx
            .get_job(item.job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(item.job_id))?;
        // Item before job here. An ACCEPTED job has never dispatched an item, so no
        // update or reaper transaction holds its job row while waiting on one of its items.
        if job.status == JobStatus::Accepted {
            let mut job = tx.lock_job(item.job_id).await?;
            if job.status == JobStatus::Accepted {
                job.apply(JobEvent::Start)?;
                tx.save_job(&job).await?;
            }
        }

        item.apply(WorkItemEvent::Dispatch)?;
        item.started_at = Some(Utc::now());
        tx.save_work_item(&item).await?;

        let step = self
            .registry
            .step(tx, item.job_id, item.workflow_step_index)
            .await?;
        let max_granules = self.throttle.limit_for(tx, &item, &step).await?;

        Ok(Some(GetWorkResponse::Work {
            work_item: item,
            max_granules,
        }))
    }
}
