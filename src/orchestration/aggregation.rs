//! # Aggregation
//!
//! Combines the outputs of every item of a step into a chain of catalog pages for
//! the single work item of an aggregating step.
//!
//! Outputs are read from each predecessor's `catalog.json`, or, when the predecessor
//! produced several batches, from the catalogs listed in its `batch-catalogs.json`.
//! Pages hold at most `page_size` item links and point at their neighbours through
//! `prev`/`next` links. Pages live in the aggregating item's own output namespace.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::catalog::{read_item_links, read_json, write_json, ObjectStore, StacCatalog, StacLink};
use crate::constants::{artifacts, system};
use crate::database::StoreTransaction;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{NewWorkItem, WorkItem, WorkflowStep};
use crate::state_machine::{WorkItemStatus, ALL_WORK_ITEM_STATUSES};

/// What an aggregation attempt produced
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    /// Pages written and the aggregating item created
    Created { work_item: WorkItem, page_count: usize },
    /// The aggregating step already has its item
    AlreadyCreated,
    /// No predecessor produced any output
    NoItemLinks,
    /// Fewer predecessor items were retrievable than exist
    Incomplete {
        step_index: i32,
        expected: i64,
        retrieved: i64,
    },
}

/// Split `links` into pages of at most `page_size`, adding `prev`/`next` links
/// that point at the page locations produced by `location_for`.
pub fn paginate_links<F>(links: Vec<StacLink>, page_size: usize, location_for: F) -> Vec<StacCatalog>
where
    F: Fn(usize) -> String,
{
    let page_size = page_size.max(1);
    let page_count = links.len().div_ceil(page_size);
    let mut chunks = links.chunks(page_size);

    (0..page_count)
        .map(|index| {
            let mut page_links = chunks.next().map(<[StacLink]>::to_vec).unwrap_or_default();
            if index > 0 {
                page_links.push(StacLink::prev_page(location_for(index - 1)));
            }
            if index + 1 < page_count {
                page_links.push(StacLink::next_page(location_for(index + 1)));
            }
            StacCatalog::aggregation_page(page_links)
        })
        .collect()
}

#[derive(Clone)]
pub struct Aggregator {
    object_store: Arc<dyn ObjectStore>,
    artifact_root: String,
    page_size: usize,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("artifact_root", &self.artifact_root)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    pub fn new(object_store: Arc<dyn ObjectStore>, artifact_root: impl Into<String>, page_size: usize) -> Self {
        Self {
            object_store,
            artifact_root: artifact_root.into(),
            page_size,
        }
    }

    /// Output item links of one predecessor
    async fn item_links_for(&self, item: &WorkItem) -> OrchestratorResult<Vec<StacLink>> {
        let store = self.object_store.as_ref();
        let single = item.output_location(&self.artifact_root, artifacts::CATALOG_FILE);
        if store.exists(&single).await? {
            return read_item_links(store, &single).await;
        }

        let index = item.output_location(&self.artifact_root, artifacts::BATCH_CATALOGS_FILE);
        let catalog_files: Vec<String> = read_json(store, &index).await?;
        let mut links = Vec::new();
        for file_name in catalog_files {
            let location = item.output_location(&self.artifact_root, &file_name);
            links.extend(read_item_links(store, &location).await?);
        }
        Ok(links)
    }

    /// Every output item link of the step, in work item order. Items that did not
    /// succeed have no outputs and are skipped.
    async fn collect_step_links(
        &self,
        tx: &mut dyn StoreTransaction,
        step: &WorkflowStep,
    ) -> OrchestratorResult<Result<Vec<StacLink>, (i64, i64)>> {
        let expected = tx
            .work_item_count_for_step(step.job_id, step.step_index, &ALL_WORK_ITEM_STATUSES)
            .await?;

        let mut links = Vec::new();
        let mut retrieved = 0i64;
        let mut page = 1;
        while retrieved < expected {
            let items = tx
                .work_items_for_step(step.job_id, step.step_index, page, system::WORK_ITEM_PAGE_SIZE)
                .await?;
            if items.is_empty() {
                break;
            }
            retrieved += items.len() as i64;
            let reads = items
                .iter()
                .filter(|item| item.status == WorkItemStatus::Successful)
                .map(|item| self.item_links_for(item));
            for item_links in try_join_all(reads).await? {
                links.extend(item_links);
            }
            page += 1;
        }

        if retrieved < expected {
            return Ok(Err((expected, retrieved)));
        }
        Ok(Ok(links))
    }

    /// Create the single work item of `next_step` from every output of the step
    /// before it. `owner` is the item whose completion triggered aggregation; the
    /// pages are written into its output namespace.
    pub async fn create_aggregating_work_item(
        &self,
        tx: &mut dyn StoreTransaction,
        owner: &WorkItem,
        next_step: &WorkflowStep,
    ) -> OrchestratorResult<AggregationOutcome> {
        let existing = tx
            .work_item_count_for_step(next_step.job_id, next_step.step_index, &ALL_WORK_ITEM_STATUSES)
            .await?;
        if existing > 0 {
            debug!(
                job_id = %next_step.job_id,
                step_index = next_step.step_index,
                "Aggregating work item already exists"
            );
            return Ok(AggregationOutcome::AlreadyCreated);
        }

        let previous = tx
            .workflow_step(next_step.job_id, next_step.step_index - 1)
            .await?
            .ok_or(OrchestratorError::WorkflowStepNotFound {
                job_id: next_step.job_id,
                step_index: next_step.step_index - 1,
            })?;

        let links = match self.collect_step_links(tx, &previous).await? {
            Ok(links) => links,
            Err((expected, retrieved)) => {
                error!(
                    job_id = %next_step.job_id,
                    step_index = previous.step_index,
                    expected,
                    retrieved,
                    "Failed to retrieve all work items for aggregation"
                );
                return Ok(AggregationOutcome::Incomplete {
                    step_index: previous.step_index,
                    expected,
                    retrieved,
                });
            }
        };
        if links.is_empty() {
            return Ok(AggregationOutcome::NoItemLinks);
        }

        let link_count = links.len();
        let pages = paginate_links(links, self.page_size, |index| {
            owner.aggregate_page_location(&self.artifact_root, index)
        });
        for (index, page) in pages.iter().enumerate() {
            let location = owner.aggregate_page_location(&self.artifact_root, index);
            write_json(self.object_store.as_ref(), &location, page).await?;
        }

        let new_item = NewWorkItem::new(owner.job_id, next_step.service_id.clone(), next_step.step_index)
            .with_catalog_location(owner.aggregate_page_location(&self.artifact_root, 0))
            .with_operation(owner.operation.clone());
        let work_item = tx
            .insert_work_items(&[new_item])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::Internal("Aggregating work item was not inserted".to_string()))?;

        info!(
            job_id = %owner.job_id,
            step_index = next_step.step_index,
            work_item_id = work_item.id,
            link_count,
            page_count = pages.len(),
            "Created aggregating work item"
        );
        Ok(AggregationOutcome::Created {
            work_item,
            page_count: pages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::rels;
    use proptest::prelude::*;

    fn item_link(n: usize) -> StacLink {
        StacLink {
            href: format!("s3://b/item{n}.json"),
            rel: rels::ITEM.to_string(),
            media_type: None,
            title: None,
        }
    }

    #[test]
    fn test_seven_links_in_pages_of_three() {
        let links = (0..7).map(item_link).collect();
        let pages = paginate_links(links, 3, |i| format!("catalog{i}.json"));

        let item_counts: Vec<usize> = pages.iter().map(|p| p.item_links().count()).collect();
        assert_eq!(item_counts, vec![3, 3, 1]);

        assert!(pages[0].link(rels::PREV).is_none());
        assert_eq!(pages[0].link(rels::NEXT).unwrap().href, "catalog1.json");
        assert_eq!(pages[1].link(rels::PREV).unwrap().href, "catalog0.json");
        assert_eq!(pages[1].link(rels::NEXT).unwrap().href, "catalog2.json");
        assert_eq!(pages[2].link(rels::PREV).unwrap().href, "catalog1.json");
        assert!(pages[2].link(rels::NEXT).is_none());
    }

    #[test]
    fn test_no_links_no_pages() {
        assert!(paginate_links(Vec::new(), 3, |i| i.to_string()).is_empty());
    }

    proptest! {
        #[test]
        fn pages_preserve_every_link(count in 0usize..200, page_size in 1usize..50) {
            let links: Vec<StacLink> = (0..count).map(item_link).collect();
            let pages = paginate_links(links.clone(), page_size, |i| i.to_string());

            prop_assert_eq!(pages.len(), count.div_ceil(page_size));
            let flattened: Vec<StacLink> = pages
                .iter()
                .flat_map(|p| p.item_links().cloned())
                .collect();
            prop_assert_eq!(flattened, links);
            for page in &pages {
                prop_assert!(page.item_links().count() <= page_size);
            }
        }
    }
}
