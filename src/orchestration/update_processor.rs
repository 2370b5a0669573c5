//! # Work Item Update Processor
//!
//! Applies one worker update inside a single transaction that locks the job row
//! first and the work item row second. Stale, duplicate and racing updates are
//! absorbed as [`UpdateOutcome::Discarded`]; only store and object store failures
//! surface as errors, and those leave nothing committed.
//!
//! ## Processing order
//!
//! 1. Discard when the job is terminal (cancellations excepted) or the item has
//!    already completed.
//! 2. A failure with retries left puts the item back in the dispatch pool.
//! 3. The item is persisted with its final duration and sizes.
//! 4. A smaller discovery hit count shrinks the job estimate and every step count.
//! 5. The failure policy may end the job.
//! 6. Successful items fan out to the next step; the end of a chain records links,
//!    advances progress and finalizes the job once its final step is complete.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::aggregation::{AggregationOutcome, Aggregator};
use super::discovery_throttle::DiscoveryThrottle;
use super::failure_policy::FailurePolicy;
use super::fan_out::{FanOutEngine, NextWork};
use super::job_finalizer::JobFinalizer;
use super::step_registry::StepRegistry;
use super::work_item_update::{DiscardReason, UpdateOutcome, WorkItemUpdate};
use crate::catalog::ObjectStore;
use crate::config::OrchestratorConfig;
use crate::constants::messages;
use crate::database::{StoreTransaction, WorkItemStore};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::{log_job_operation, log_work_item_operation};
use crate::models::{Job, WorkItem, WorkflowStep};
use crate::state_machine::{JobStatus, WorkItemEvent, WorkItemStateMachine, WorkItemStatus};

#[derive(Clone)]
pub struct WorkItemUpdateProcessor {
    store: Arc<dyn WorkItemStore>,
    retry_limit: i32,
    registry: StepRegistry,
    finalizer: JobFinalizer,
    failure_policy: FailurePolicy,
    fan_out: FanOutEngine,
}

impl std::fmt::Debug for WorkItemUpdateProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemUpdateProcessor")
            .field("retry_limit", &self.retry_limit)
            .field("fan_out", &self.fan_out)
            .finish_non_exhaustive()
    }
}

impl WorkItemUpdateProcessor {
    pub fn new(
        store: Arc<dyn WorkItemStore>,
        object_store: Arc<dyn ObjectStore>,
        config: &OrchestratorConfig,
    ) -> Self {
        let registry = StepRegistry::new(config.discovery.max_page_size);
        let finalizer = JobFinalizer::new(object_store.clone());
        let failure_policy = FailurePolicy::new(
            object_store.clone(),
            finalizer.clone(),
            registry,
            config.jobs.max_errors_for_job,
        );
        let aggregator = Aggregator::new(
            object_store,
            config.artifacts.root.clone(),
            config.work_items.aggregation_page_size,
        );
        let fan_out = FanOutEngine::new(
            aggregator,
            DiscoveryThrottle::new(config.discovery.max_page_size),
            registry,
            config.work_items.insert_batch_size,
        );

        Self {
            store,
            retry_limit: config.work_items.retry_limit,
            registry,
            finalizer,
            failure_policy,
            fan_out,
        }
    }

    /// Apply `update` and commit, or roll back when any step fails
    #[instrument(skip(self, update), fields(work_item_id = update.work_item_id, status = %update.status))]
    pub async fn handle_update(&self, update: WorkItemUpdate) -> OrchestratorResult<UpdateOutcome> {
        if update.status == WorkItemStatus::Successful {
            info!("Updating work item to successful");
        }

        let mut tx = self.store.begin().await?;
        match self.process(tx.as_mut(), &update).await {
            Ok(outcome) => {
                tx.commit().await?;
                debug!(outcome = ?outcome, "Work item update committed");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Work item update failed, rolling back");
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback after failed update also failed");
                }
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        tx: &mut dyn StoreTransaction,
        update: &WorkItemUpdate,
    ) -> OrchestratorResult<UpdateOutcome> {
        let job_id = tx
            .get_work_item(update.work_item_id)
            .await?
            .ok_or(OrchestratorError::WorkItemNotFound(update.work_item_id))?
            .job_id;

        // job before item, always
        let mut job = tx.lock_job(job_id).await?;
        let mut item = tx.lock_work_item(update.work_item_id).await?;
        let step = self
            .registry
            .step(tx, item.job_id, item.workflow_step_index)
            .await?;

        if job.is_complete() && update.status != WorkItemStatus::Canceled {
            warn!(job_id = %job.job_id, job_status = %job.status, "Job was already terminal");
            return Ok(UpdateOutcome::Discarded {
                reason: DiscardReason::JobTerminal,
            });
        }
        if item.is_completed() {
            warn!(item_status = %item.status, "Work item was already completed");
            return Ok(UpdateOutcome::Discarded {
                reason: DiscardReason::ItemCompleted,
            });
        }
        let event = match WorkItemStateMachine::event_for_reported_status(
            update.status,
            update.error_message.as_deref(),
        ) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Unsupported work item update status");
                return Ok(UpdateOutcome::Discarded {
                    reason: DiscardReason::UnsupportedStatus,
                });
            }
        };

        if update.status == WorkItemStatus::Failed && item.retry_count < self.retry_limit {
            return self.retry(tx, &mut item, update).await;
        }
        if update.status == WorkItemStatus::Failed {
            warn!(
                retry_limit = self.retry_limit,
                error_message = update.error_message.as_deref().unwrap_or_default(),
                "Retry limit exceeded, failing work item"
            );
        }

        self.record_completion(tx, &mut item, event, update).await?;
        if update.status == WorkItemStatus::Canceled {
            return Ok(UpdateOutcome::Canceled);
        }

        let mut all_complete = self.registry.is_step_complete(tx, &step).await?;

        if let Some(hits) = update.hits {
            if hits > 0 && hits < job.num_input_granules {
                info!(
                    job_id = %job.job_id,
                    from = job.num_input_granules,
                    to = hits,
                    "Discovery reported fewer granules than estimated"
                );
                job.num_input_granules = hits;
                tx.save_job(&job).await?;
                self.registry.recompute_work_item_counts(tx, &job).await?;
                // the shrunken count may leave this step with nothing more to wait for
                let resized = self.registry.step(tx, job.job_id, step.step_index).await?;
                all_complete = all_complete || self.registry.is_step_complete(tx, &resized).await?;
            }
        }

        let decision = self
            .failure_policy
            .apply(
                tx,
                &mut job,
                &item,
                &step,
                update.status,
                update.error_message.as_deref(),
            )
            .await?;
        if !decision.should_continue() {
            return Ok(UpdateOutcome::JobFinished {
                job_status: job.status,
            });
        }

        if update.status == WorkItemStatus::Successful {
            let next = self
                .fan_out
                .create_next_work_items(tx, &item, &update.results, all_complete)
                .await?;
            match next {
                NextWork::EndOfChain => {}
                NextWork::MissingResults => {
                    error!(
                        job_id = %job.job_id,
                        "Update should have contained results to queue next work items"
                    );
                    return self
                        .fail_job(tx, &mut job, messages::NEXT_WORK_ITEMS_MISSING.to_string())
                        .await;
                }
                NextWork::Aggregated(outcome) => {
                    let created = usize::from(matches!(outcome, AggregationOutcome::Created { .. }));
                    if let Some(finished) = self.settle_aggregation(tx, &mut job, outcome).await? {
                        return Ok(finished);
                    }
                    let continued = self.continue_discovery(tx, &item, &step, update).await?;
                    return Ok(UpdateOutcome::Advanced {
                        created_work_items: created + continued,
                    });
                }
                NextWork::Created { count } => {
                    let continued = self.continue_discovery(tx, &item, &step, update).await?;
                    return Ok(UpdateOutcome::Advanced {
                        created_work_items: count + continued,
                    });
                }
                NextWork::AwaitingStep => {
                    let continued = self.continue_discovery(tx, &item, &step, update).await?;
                    return Ok(UpdateOutcome::Advanced {
                        created_work_items: continued,
                    });
                }
            }
        } else if let Some(outcome) = self
            .fan_out
            .aggregate_after_failure(tx, &item, &step)
            .await?
        {
            if let Some(finished) = self.settle_aggregation(tx, &mut job, outcome).await? {
                return Ok(finished);
            }
        }

        self.end_chain(tx, &mut job, &step, update).await
    }

    async fn retry(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &mut WorkItem,
        update: &WorkItemUpdate,
    ) -> OrchestratorResult<UpdateOutcome> {
        item.retry_count += 1;
        // re-dispatch resets started_at, so the failed attempt's wall clock is kept now
        let observed = item.observed_duration_ms(Utc::now());
        let reported = update.duration_ms.unwrap_or(0);
        item.duration_ms = item.duration_ms.max(observed).max(reported);
        item.apply(WorkItemEvent::Retry)?;
        tx.save_work_item(item).await?;

        warn!(retry_count = item.retry_count, "Retrying failed work item");
        Ok(UpdateOutcome::Retried {
            retry_count: item.retry_count,
        })
    }

    async fn record_completion(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &mut WorkItem,
        event: WorkItemEvent,
        update: &WorkItemUpdate,
    ) -> OrchestratorResult<()> {
        let observed = item.observed_duration_ms(Utc::now());
        let reported = update.duration_ms.unwrap_or(0);
        item.duration_ms = item.duration_ms.max(observed).max(reported);
        if let Some(size) = update.total_granules_size {
            item.total_granules_size = size;
        }
        if !update.output_item_sizes.is_empty() {
            item.output_item_sizes = update.output_item_sizes.clone();
        }
        let status = item.apply(event)?;
        tx.save_work_item(item).await?;

        log_work_item_operation(
            "complete",
            item.job_id,
            item.id,
            item.workflow_step_index,
            status.as_str(),
            update.error_message.as_deref(),
        );
        debug!(duration_ms = item.duration_ms, "Work item duration");
        Ok(())
    }

    async fn continue_discovery(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &WorkItem,
        step: &WorkflowStep,
        update: &WorkItemUpdate,
    ) -> OrchestratorResult<usize> {
        let queued = self
            .fan_out
            .maybe_queue_discovery(tx, item, step, update.scroll_id.clone())
            .await?;
        Ok(usize::from(queued.is_some()))
    }

    /// Job-level consequence of an aggregation attempt, or `None` to keep going
    async fn settle_aggregation(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
        outcome: AggregationOutcome,
    ) -> OrchestratorResult<Option<UpdateOutcome>> {
        match outcome {
            AggregationOutcome::Created { .. } | AggregationOutcome::AlreadyCreated => Ok(None),
            AggregationOutcome::NoItemLinks => {
                info!(job_id = %job.job_id, "Nothing to aggregate, finalizing job");
                self.finalizer.finalize(tx, job).await?;
                Ok(Some(UpdateOutcome::JobFinished {
                    job_status: job.status,
                }))
            }
            AggregationOutcome::Incomplete { step_index, .. } => {
                let outcome = self
                    .fail_job(tx, job, messages::aggregation_incomplete(step_index))
                    .await?;
                Ok(Some(outcome))
            }
        }
    }

    async fn fail_job(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
        message: String,
    ) -> OrchestratorResult<UpdateOutcome> {
        self.finalizer
            .complete_job(tx, job, JobStatus::Failed, Some(message))
            .await?;
        Ok(UpdateOutcome::JobFinished {
            job_status: job.status,
        })
    }

    /// This item's chain is over: record links, advance progress and finalize
    /// when the workflow's final step is complete
    async fn end_chain(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
        step: &WorkflowStep,
        update: &WorkItemUpdate,
    ) -> OrchestratorResult<UpdateOutcome> {
        if update.status != WorkItemStatus::Failed {
            self.finalizer
                .add_links_for_results(tx, job.job_id, &update.results)
                .await?;
        }

        job.complete_batch(step.work_item_count);
        if self.registry.is_job_finished(tx, job.job_id).await? {
            self.finalizer.finalize(tx, job).await?;
            return Ok(UpdateOutcome::JobFinished {
                job_status: job.status,
            });
        }

        if job.status == JobStatus::Previewing {
            job.pause()?;
            log_job_operation("pause", job.job_id, job.status.as_str(), Some("preview"));
        }
        tx.save_job(job).await?;
        Ok(UpdateOutcome::ChainCompleted {
            job_status: job.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{write_json, InMemoryObjectStore};
    use crate::database::InMemoryWorkItemStore;
    use crate::models::{
        JobError, JobLink, NewJob, NewJobError, NewJobLink, NewWorkItem, NewWorkflowStep,
        StepRole,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use uuid::Uuid;

    const ROOT: &str = "mem://artifacts";

    /// Store whose step item pages come back one item short
    struct ShortPageStore {
        inner: InMemoryWorkItemStore,
    }

    struct ShortPageTransaction {
        inner: Box<dyn StoreTransaction>,
    }

    #[async_trait]
    impl WorkItemStore for ShortPageStore {
        async fn begin(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
            Ok(Box::new(ShortPageTransaction {
                inner: self.inner.begin().await?,
            }))
        }
    }

    #[async_trait]
    impl StoreTransaction for ShortPageTransaction {
        async fn insert_job(&mut self, job: NewJob) -> OrchestratorResult<Job> {
            self.inner.insert_job(job).await
        }

        async fn get_job(&mut self, job_id: Uuid) -> OrchestratorResult<Option<Job>> {
            self.inner.get_job(job_id).await
        }

        async fn lock_job(&mut self, job_id: Uuid) -> OrchestratorResult<Job> {
            self.inner.lock_job(job_id).await
        }

        async fn save_job(&mut self, job: &Job) -> OrchestratorResult<()> {
            self.inner.save_job(job).await
        }

        async fn insert_workflow_steps(
            &mut self,
            steps: Vec<NewWorkflowStep>,
        ) -> OrchestratorResult<Vec<WorkflowStep>> {
            self.inner.insert_workflow_steps(steps).await
        }

        async fn workflow_step(
            &mut self,
            job_id: Uuid,
            step_index: i32,
        ) -> OrchestratorResult<Option<WorkflowStep>> {
            self.inner.workflow_step(job_id, step_index).await
        }

        async fn workflow_steps(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<WorkflowStep>> {
            self.inner.workflow_steps(job_id).await
        }

        async fn save_workflow_step(&mut self, step: &WorkflowStep) -> OrchestratorResult<()> {
            self.inner.save_workflow_step(step).await
        }

        async fn get_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<Option<WorkItem>> {
            self.inner.get_work_item(work_item_id).await
        }

        async fn lock_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<WorkItem> {
            self.inner.lock_work_item(work_item_id).await
        }

        async fn save_work_item(&mut self, item: &WorkItem) -> OrchestratorResult<()> {
            self.inner.save_work_item(item).await
        }

        async fn claim_next_work_item(
            &mut self,
            service_id: &str,
        ) -> OrchestratorResult<Option<WorkItem>> {
            self.inner.claim_next_work_item(service_id).await
        }

        async fn insert_work_items(
            &mut self,
            items: &[NewWorkItem],
        ) -> OrchestratorResult<Vec<WorkItem>> {
            self.inner.insert_work_items(items).await
        }

        async fn work_item_count_for_step(
            &mut self,
            job_id: Uuid,
            step_index: i32,
            statuses: &[WorkItemStatus],
        ) -> OrchestratorResult<i64> {
            self.inner
                .work_item_count_for_step(job_id, step_index, statuses)
                .await
        }

        async fn work_items_for_step(
            &mut self,
            job_id: Uuid,
            step_index: i32,
            page: i64,
            page_size: i64,
        ) -> OrchestratorResult<Vec<WorkItem>> {
            let mut items = self
                .inner
                .work_items_for_step(job_id, step_index, page, page_size)
                .await?;
            items.pop();
            Ok(items)
        }

        async fn orphaned_work_item_ids(&mut self) -> OrchestratorResult<Vec<i64>> {
            self.inner.orphaned_work_item_ids().await
        }

        async fn stale_running_work_item_ids(
            &mut self,
            started_before: DateTime<Utc>,
        ) -> OrchestratorResult<Vec<i64>> {
            self.inner.stale_running_work_item_ids(started_before).await
        }

        async fn add_job_error(&mut self, error: NewJobError) -> OrchestratorResult<JobError> {
            self.inner.add_job_error(error).await
        }

        async fn job_error_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
            self.inner.job_error_count(job_id).await
        }

        async fn job_errors(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobError>> {
            self.inner.job_errors(job_id).await
        }

        async fn add_job_links(&mut self, links: Vec<NewJobLink>) -> OrchestratorResult<Vec<JobLink>> {
            self.inner.add_job_links(links).await
        }

        async fn job_data_link_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
            self.inner.job_data_link_count(job_id).await
        }

        async fn job_links(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobLink>> {
            self.inner.job_links(job_id).await
        }

        async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
            self.inner.rollback().await
        }
    }

    /// Two-granule job whose second step aggregates, with both first-step items
    /// having written a `catalog.json`. Returns the job, the items and their results.
    async fn seed_aggregation_job(
        store: &InMemoryWorkItemStore,
        object_store: &InMemoryObjectStore,
    ) -> (Job, Vec<WorkItem>, Vec<String>) {
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 2)).await.unwrap();
        tx.insert_workflow_steps(vec![
            NewWorkflowStep {
                job_id: job.job_id,
                step_index: 1,
                service_id: "subsetter".to_string(),
                role: StepRole::Service,
                work_item_count: 2,
                has_aggregated_output: false,
            },
            NewWorkflowStep {
                job_id: job.job_id,
                step_index: 2,
                service_id: "concise".to_string(),
                role: StepRole::Service,
                work_item_count: 1,
                has_aggregated_output: true,
            },
        ])
        .await
        .unwrap();
        let items = tx
            .insert_work_items(&[
                NewWorkItem::new(job.job_id, "subsetter", 1),
                NewWorkItem::new(job.job_id, "subsetter", 1),
            ])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut results = Vec::new();
        for item in &items {
            let location = item.output_location(ROOT, "catalog.json");
            let catalog = json!({ "stac_version": "1.0.0", "id": format!("c{}", item.id), "links": [] });
            write_json(object_store, &location, &catalog).await.unwrap();
            results.push(location);
        }
        (job, items, results)
    }

    fn processor(
        store: Arc<dyn WorkItemStore>,
        object_store: Arc<InMemoryObjectStore>,
    ) -> WorkItemUpdateProcessor {
        let mut config = OrchestratorConfig::default();
        config.artifacts.root = ROOT.to_string();
        WorkItemUpdateProcessor::new(store, object_store, &config)
    }

    #[tokio::test]
    async fn test_unretrievable_predecessors_fail_the_job() {
        let inner = InMemoryWorkItemStore::new();
        let object_store = Arc::new(InMemoryObjectStore::new());
        let (job, items, results) = seed_aggregation_job(&inner, &object_store).await;
        let processor = processor(
            Arc::new(ShortPageStore {
                inner: inner.clone(),
            }),
            object_store,
        );

        let first = processor
            .handle_update(WorkItemUpdate::succeeded(items[0].id, vec![results[0].clone()]))
            .await
            .unwrap();
        assert_eq!(first, UpdateOutcome::Advanced { created_work_items: 0 });

        let second = processor
            .handle_update(WorkItemUpdate::succeeded(items[1].id, vec![results[1].clone()]))
            .await
            .unwrap();
        assert_eq!(
            second,
            UpdateOutcome::JobFinished {
                job_status: JobStatus::Failed
            }
        );

        let mut tx = inner.begin().await.unwrap();
        let failed = tx.get_job(job.job_id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.message, Some(messages::aggregation_incomplete(1)));
        let aggregating = tx
            .work_item_count_for_step(job.job_id, 2, &[WorkItemStatus::Ready])
            .await
            .unwrap();
        assert_eq!(aggregating, 0);
    }

    #[tokio::test]
    async fn test_existing_aggregating_item_is_not_counted_as_created() {
        let store = InMemoryWorkItemStore::new();
        let object_store = Arc::new(InMemoryObjectStore::new());
        let (job, items, results) = seed_aggregation_job(&store, &object_store).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_work_items(&[NewWorkItem::new(job.job_id, "concise", 2)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let processor = processor(Arc::new(store.clone()), object_store);
        for (item, result) in items.iter().zip(results) {
            let outcome = processor
                .handle_update(WorkItemUpdate::succeeded(item.id, vec![result]))
                .await
                .unwrap();
            assert_eq!(outcome, UpdateOutcome::Advanced { created_work_items: 0 });
        }

        let mut tx = store.begin().await.unwrap();
        let aggregating = tx
            .work_item_count_for_step(job.job_id, 2, &[WorkItemStatus::Ready])
            .await
            .unwrap();
        assert_eq!(aggregating, 1);
    }
}
