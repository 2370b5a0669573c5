//! # Work Item Update Queue
//!
//! Fire-and-forget intake for worker updates. `submit` returns as soon as the
//! update is queued; a background consumer applies it through the
//! [`WorkItemUpdateProcessor`]. Updates whose processing fails with a store or
//! object store error are redelivered after a delay, up to a bounded number of
//! attempts. Redelivery is safe because completed items ignore further updates.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::update_processor::WorkItemUpdateProcessor;
use super::work_item_update::WorkItemUpdate;
use crate::config::UpdateQueueConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Counters reported by the consumer when the queue shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQueueStats {
    pub processed: u64,
    pub redelivered: u64,
    pub dropped: u64,
}

/// Cloneable sending side of the queue
#[derive(Debug, Clone)]
pub struct UpdateSubmitter {
    sender: mpsc::Sender<WorkItemUpdate>,
}

impl UpdateSubmitter {
    /// Queue `update`; waits only while the queue is full
    pub async fn submit(&self, update: WorkItemUpdate) -> OrchestratorResult<()> {
        let work_item_id = update.work_item_id;
        self.sender
            .send(update)
            .await
            .map_err(|_| OrchestratorError::QueueClosed)?;
        debug!(work_item_id, "Queued work item update");
        Ok(())
    }
}

#[derive(Debug)]
pub struct WorkItemUpdateQueue {
    submitter: UpdateSubmitter,
    consumer: JoinHandle<UpdateQueueStats>,
}

impl WorkItemUpdateQueue {
    /// Spawn the consumer on the current runtime
    pub fn start(processor: Arc<WorkItemUpdateProcessor>, config: &UpdateQueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let consumer = tokio::spawn(consume(
            processor,
            receiver,
            config.max_delivery_attempts.max(1),
            config.redelivery_delay(),
        ));
        info!(capacity = config.capacity, "📬 Work item update queue started");
        Self {
            submitter: UpdateSubmitter { sender },
            consumer,
        }
    }

    pub fn submitter(&self) -> UpdateSubmitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, update: WorkItemUpdate) -> OrchestratorResult<()> {
        self.submitter.submit(update).await
    }

    /// Stop accepting updates from this handle and wait for the consumer to drain.
    ///
    /// The consumer only finishes once every cloned submitter is dropped too.
    pub async fn shutdown(self) -> OrchestratorResult<UpdateQueueStats> {
        drop(self.submitter);
        let stats = self
            .consumer
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Update consumer panicked: {e}")))?;
        info!(
            processed = stats.processed,
            redelivered = stats.redelivered,
            dropped = stats.dropped,
            "Work item update queue drained"
        );
        Ok(stats)
    }
}

async fn consume(
    processor: Arc<WorkItemUpdateProcessor>,
    mut receiver: mpsc::Receiver<WorkItemUpdate>,
    max_attempts: u32,
    redelivery_delay: Duration,
) -> UpdateQueueStats {
    let mut stats = UpdateQueueStats::default();

    while let Some(update) = receiver.recv().await {
        let work_item_id = update.work_item_id;
        let mut attempt = 1;
        loop {
            match processor.handle_update(update.clone()).await {
                Ok(outcome) => {
                    debug!(work_item_id, outcome = ?outcome, "Processed work item update");
                    stats.processed += 1;
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        work_item_id,
                        attempt,
                        error = %e,
                        "Work item update failed, redelivering"
                    );
                    stats.redelivered += 1;
                    attempt += 1;
                    tokio::time::sleep(redelivery_delay).await;
                }
                Err(e) => {
                    error!(
                        work_item_id,
                        attempts = attempt,
                        error = %e,
                        "Dropping work item update after repeated failures"
                    );
                    stats.dropped += 1;
                    break;
                }
            }
        }
    }

    stats
}
