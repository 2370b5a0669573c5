//! # Work Item Reaper
//!
//! Timer-driven sweep for items nobody will report on. Items still READY or
//! RUNNING against a terminal job are canceled. RUNNING items whose worker has been
//! silent past the timeout get a synthetic failure through the update processor,
//! so the usual retry and error budget rules decide what happens next.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::update_processor::WorkItemUpdateProcessor;
use super::work_item_update::WorkItemUpdate;
use crate::config::WorkItemConfig;
use crate::constants::messages;
use crate::database::{StoreTransaction, WorkItemStore};
use crate::error::OrchestratorResult;
use crate::state_machine::WorkItemEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapSummary {
    pub canceled: usize,
    pub timed_out: usize,
}

#[derive(Clone)]
pub struct WorkItemReaper {
    store: Arc<dyn WorkItemStore>,
    processor: Arc<WorkItemUpdateProcessor>,
    timeout: chrono::Duration,
    interval: Duration,
}

impl std::fmt::Debug for WorkItemReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemReaper")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl WorkItemReaper {
    pub fn new(
        store: Arc<dyn WorkItemStore>,
        processor: Arc<WorkItemUpdateProcessor>,
        config: &WorkItemConfig,
    ) -> Self {
        Self {
            store,
            processor,
            timeout: chrono::Duration::seconds(config.reaper_timeout_seconds),
            interval: config.reaper_interval(),
        }
    }

    /// One sweep over orphaned and stale items
    pub async fn reap_once(&self) -> OrchestratorResult<ReapSummary> {
        let canceled = self.cancel_orphaned().await?;

        let started_before = Utc::now() - self.timeout;
        let stale = {
            let mut tx = self.store.begin().await?;
            let ids = tx.stale_running_work_item_ids(started_before).await?;
            tx.commit().await?;
            ids
        };

        let mut timed_out = 0;
        for work_item_id in stale {
            let update = WorkItemUpdate::failed(work_item_id, messages::WORKER_TIMED_OUT);
            match self.processor.handle_update(update).await {
                Ok(outcome) if !outcome.is_discarded() => timed_out += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(work_item_id, error = %e, "Could not time out stale work item");
                }
            }
        }

        if canceled > 0 || timed_out > 0 {
            info!(canceled, timed_out, "🧹 Reaped work items");
        }
        Ok(ReapSummary {
            canceled,
            timed_out,
        })
    }

    async fn cancel_orphaned(&self) -> OrchestratorResult<usize> {
        let mut tx = self.store.begin().await?;
        let result = cancel_orphaned_in(tx.as_mut()).await;
        match result {
            Ok(count) => {
                tx.commit().await?;
                Ok(count)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed reap also failed");
                }
                Err(e)
            }
        }
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Work item reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.reap_once().await {
                        error!(error = %e, "Work item reap failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Shutdown signal received");
                        break;
                    }
                }
            }
        }
        info!("Work item reaper stopped");
    }
}

async fn cancel_orphaned_in(tx: &mut dyn StoreTransaction) -> OrchestratorResult<usize> {
    let mut canceled = 0;
    for work_item_id in tx.orphaned_work_item_ids().await? {
        let Some(snapshot) = tx.get_work_item(work_item_id).await? else {
            continue;
        };
        tx.lock_job(snapshot.job_id).await?;
        let mut item = tx.lock_work_item(work_item_id).await?;
        if item.is_completed() {
            continue;
        }
        item.apply(WorkItemEvent::Cancel)?;
        tx.save_work_item(&item).await?;
        canceled += 1;
    }
    Ok(canceled)
}
