//! # Fan-Out Engine
//!
//! Materializes the work of the next workflow step once an item finishes. A
//! non-aggregating next step gets one work item per result catalog; an aggregating
//! next step gets a single item, created only after every item of the current step
//! has completed. Discovery items also keep their own paging alive by queueing a
//! continuation while the throttle still reports granules to fetch.

use tracing::{debug, info};

use super::aggregation::{AggregationOutcome, Aggregator};
use super::discovery_throttle::DiscoveryThrottle;
use super::step_registry::StepRegistry;
use crate::database::StoreTransaction;
use crate::error::OrchestratorResult;
use crate::models::{NewWorkItem, WorkItem, WorkflowStep};

/// What was created for the step after a successful item
#[derive(Debug, Clone, PartialEq)]
pub enum NextWork {
    /// The item was on the final step
    EndOfChain,
    /// A next step exists but the item reported no results
    MissingResults,
    /// One item per result for a non-aggregating next step
    Created { count: usize },
    /// The next step aggregates and the current step is still running
    AwaitingStep,
    Aggregated(AggregationOutcome),
}

#[derive(Debug, Clone)]
pub struct FanOutEngine {
    aggregator: Aggregator,
    throttle: DiscoveryThrottle,
    registry: StepRegistry,
    insert_batch_size: usize,
}

impl FanOutEngine {
    pub fn new(
        aggregator: Aggregator,
        throttle: DiscoveryThrottle,
        registry: StepRegistry,
        insert_batch_size: usize,
    ) -> Self {
        Self {
            aggregator,
            throttle,
            registry,
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    /// Create the next step's work for a successful `item`
    pub async fn create_next_work_items(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &WorkItem,
        results: &[String],
        all_complete: bool,
    ) -> OrchestratorResult<NextWork> {
        let Some(next_step) = tx
            .workflow_step(item.job_id, item.workflow_step_index + 1)
            .await?
        else {
            return Ok(NextWork::EndOfChain);
        };
        if results.is_empty() {
            return Ok(NextWork::MissingResults);
        }

        if next_step.has_aggregated_output {
            if !all_complete {
                debug!(
                    job_id = %item.job_id,
                    step_index = next_step.step_index,
                    "Waiting for remaining items before aggregating"
                );
                return Ok(NextWork::AwaitingStep);
            }
            let outcome = self
                .aggregator
                .create_aggregating_work_item(tx, item, &next_step)
                .await?;
            return Ok(NextWork::Aggregated(outcome));
        }

        let new_items: Vec<NewWorkItem> = results
            .iter()
            .map(|result| {
                NewWorkItem::new(item.job_id, next_step.service_id.clone(), next_step.step_index)
                    .with_catalog_location(result.clone())
                    .with_operation(item.operation.clone())
            })
            .collect();
        let mut count = 0;
        for batch in new_items.chunks(self.insert_batch_size) {
            count += tx.insert_work_items(batch).await?.len();
        }
        debug!(
            job_id = %item.job_id,
            work_item_id = item.id,
            step_index = next_step.step_index,
            count,
            "Created next step work items"
        );
        Ok(NextWork::Created { count })
    }

    /// Queue another page of discovery for `item` while the throttle allows it.
    ///
    /// The continuation carries the cursor reported by the finished page.
    pub async fn maybe_queue_discovery(
        &self,
        tx: &mut dyn StoreTransaction,
        item: &WorkItem,
        step: &WorkflowStep,
        scroll_id: Option<String>,
    ) -> OrchestratorResult<Option<WorkItem>> {
        match self.throttle.limit_for(tx, item, step).await? {
            Some(limit) if limit > 0 => {}
            _ => return Ok(None),
        }

        let mut continuation =
            NewWorkItem::new(item.job_id, item.service_id.clone(), item.workflow_step_index)
                .with_scroll_id(scroll_id)
                .with_operation(item.operation.clone());
        if let Some(location) = &item.catalog_location {
            continuation = continuation.with_catalog_location(location.clone());
        }
        let queued = tx.insert_work_items(&[continuation]).await?.into_iter().next();
        if let Some(queued) = &queued {
            info!(
                job_id = %item.job_id,
                work_item_id = queued.id,
                "🔎 Queued next discovery page"
            );
        }
        Ok(queued)
    }

    /// After a permanent failure that the job survives, the failed granule may have
    /// been the last one the next aggregating step was waiting for.
    ///
    /// Returns `None` when no aggregation is due.
    pub async fn aggregate_after_failure(
        &self,
        tx: &mut dyn StoreTransaction,
        failed_item: &WorkItem,
        failed_step: &WorkflowStep,
    ) -> OrchestratorResult<Option<AggregationOutcome>> {
        let steps = tx.workflow_steps(failed_step.job_id).await?;
        let Some(target) = steps
            .iter()
            .find(|step| step.step_index > failed_step.step_index && step.has_aggregated_output)
        else {
            return Ok(None);
        };
        let Some(predecessor) = steps
            .iter()
            .find(|step| step.step_index == target.step_index - 1)
        else {
            return Ok(None);
        };
        if !self.registry.is_step_complete(tx, predecessor).await? {
            return Ok(None);
        }

        match self
            .aggregator
            .create_aggregating_work_item(tx, failed_item, target)
            .await?
        {
            AggregationOutcome::AlreadyCreated => Ok(None),
            outcome => Ok(Some(outcome)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryObjectStore;
    use crate::database::{InMemoryWorkItemStore, WorkItemStore};
    use crate::models::{NewJob, NewWorkflowStep, StepRole};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn engine(insert_batch_size: usize) -> FanOutEngine {
        let aggregator = Aggregator::new(Arc::new(InMemoryObjectStore::new()), "mem://artifacts", 3);
        FanOutEngine::new(
            aggregator,
            DiscoveryThrottle::new(100),
            StepRegistry::new(100),
            insert_batch_size,
        )
    }

    fn step(job_id: Uuid, index: i32, role: StepRole, aggregated: bool, count: i32) -> NewWorkflowStep {
        NewWorkflowStep {
            job_id,
            step_index: index,
            service_id: format!("svc-{index}"),
            role,
            work_item_count: count,
            has_aggregated_output: aggregated,
        }
    }

    #[tokio::test]
    async fn test_one_item_per_result_in_batches() {
        let store = InMemoryWorkItemStore::new();
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 5)).await.unwrap();
        tx.insert_workflow_steps(vec![
            step(job.job_id, 1, StepRole::Discovery, false, 1),
            step(job.job_id, 2, StepRole::Service, false, 5),
        ])
        .await
        .unwrap();
        let item = tx
            .insert_work_items(&[NewWorkItem::new(job.job_id, "svc-1", 1)
                .with_operation(json!({"format": "image/png"}))])
            .await
            .unwrap()
            .remove(0);

        let results: Vec<String> = (0..5).map(|i| format!("s3://b/catalog{i}.json")).collect();
        let next = engine(2)
            .create_next_work_items(tx.as_mut(), &item, &results, false)
            .await
            .unwrap();
        assert_eq!(next, NextWork::Created { count: 5 });

        let created = tx.work_items_for_step(job.job_id, 2, 1, 100).await.unwrap();
        assert_eq!(created.len(), 5);
        assert_eq!(created[3].catalog_location.as_deref(), Some("s3://b/catalog3.json"));
        assert_eq!(created[0].operation, json!({"format": "image/png"}));
        assert_eq!(created[0].service_id, "svc-2");
    }

    #[tokio::test]
    async fn test_missing_results_and_end_of_chain() {
        let store = InMemoryWorkItemStore::new();
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 1)).await.unwrap();
        tx.insert_workflow_steps(vec![
            step(job.job_id, 1, StepRole::Discovery, false, 1),
            step(job.job_id, 2, StepRole::Service, false, 1),
        ])
        .await
        .unwrap();
        let items = tx
            .insert_work_items(&[
                NewWorkItem::new(job.job_id, "svc-1", 1),
                NewWorkItem::new(job.job_id, "svc-2", 2),
            ])
            .await
            .unwrap();

        let engine = engine(10);
        assert_eq!(
            engine.create_next_work_items(tx.as_mut(), &items[0], &[], true).await.unwrap(),
            NextWork::MissingResults
        );
        assert_eq!(
            engine
                .create_next_work_items(tx.as_mut(), &items[1], &["s3://b/c.json".to_string()], true)
                .await
                .unwrap(),
            NextWork::EndOfChain
        );
    }

    #[tokio::test]
    async fn test_aggregating_step_waits_for_all_items() {
        let store = InMemoryWorkItemStore::new();
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 2)).await.unwrap();
        tx.insert_workflow_steps(vec![
            step(job.job_id, 1, StepRole::Service, false, 2),
            step(job.job_id, 2, StepRole::Service, true, 1),
        ])
        .await
        .unwrap();
        let item = tx
            .insert_work_items(&[NewWorkItem::new(job.job_id, "svc-1", 1)])
            .await
            .unwrap()
            .remove(0);

        let next = engine(10)
            .create_next_work_items(tx.as_mut(), &item, &["s3://b/c.json".to_string()], false)
            .await
            .unwrap();
        assert_eq!(next, NextWork::AwaitingStep);
        assert!(tx.work_items_for_step(job.job_id, 2, 1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_continuation_carries_cursor() {
        let store = InMemoryWorkItemStore::new();
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 250)).await.unwrap();
        let steps = tx
            .insert_workflow_steps(vec![step(job.job_id, 1, StepRole::Discovery, false, 3)])
            .await
            .unwrap();
        let mut item = tx
            .insert_work_items(&[NewWorkItem::new(job.job_id, "svc-1", 1)
                .with_catalog_location("s3://b/input.json")])
            .await
            .unwrap()
            .remove(0);
        item.apply(crate::state_machine::WorkItemEvent::Succeed).unwrap();
        tx.save_work_item(&item).await.unwrap();

        let queued = engine(10)
            .maybe_queue_discovery(tx.as_mut(), &item, &steps[0], Some("cursor-2".to_string()))
            .await
            .unwrap()
            .expect("continuation queued");
        assert_eq!(queued.workflow_step_index, 1);
        assert_eq!(queued.scroll_id.as_deref(), Some("cursor-2"));
        assert_eq!(queued.catalog_location.as_deref(), Some("s3://b/input.json"));
    }

    #[tokio::test]
    async fn test_no_continuation_for_service_steps() {
        let store = InMemoryWorkItemStore::new();
        let mut tx = store.begin().await.unwrap();
        let job = tx.insert_job(NewJob::new("joe", 250)).await.unwrap();
        let steps = tx
            .insert_workflow_steps(vec![step(job.job_id, 1, StepRole::Service, false, 250)])
            .await
            .unwrap();
        let item = tx
            .insert_work_items(&[NewWorkItem::new(job.job_id, "svc-1", 1)])
            .await
            .unwrap()
            .remove(0);

        let queued = engine(10)
            .maybe_queue_discovery(tx.as_mut(), &item, &steps[0], None)
            .await
            .unwrap();
        assert!(queued.is_none());
    }
}
