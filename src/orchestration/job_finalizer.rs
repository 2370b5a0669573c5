//! # Job Finalizer
//!
//! Terminal transitions for jobs and the output links recorded when a chain
//! finishes. Completion is guarded by the job's own status, so a second attempt on
//! a terminal job changes nothing.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{read_catalog_items, ObjectStore};
use crate::database::StoreTransaction;
use crate::error::OrchestratorResult;
use crate::logging::log_job_operation;
use crate::models::{Job, NewJobLink};
use crate::state_machine::JobStatus;

#[derive(Clone)]
pub struct JobFinalizer {
    object_store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for JobFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFinalizer").finish_non_exhaustive()
    }
}

impl JobFinalizer {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    /// Final status from accumulated outcomes
    pub async fn final_status(
        &self,
        tx: &mut dyn StoreTransaction,
        job_id: Uuid,
    ) -> OrchestratorResult<JobStatus> {
        if tx.job_error_count(job_id).await? == 0 {
            return Ok(JobStatus::Successful);
        }
        if tx.job_data_link_count(job_id).await? > 0 {
            Ok(JobStatus::CompleteWithErrors)
        } else {
            Ok(JobStatus::Failed)
        }
    }

    /// Derive the final status and complete the job with it.
    ///
    /// Returns `None` when the job was already terminal.
    pub async fn finalize(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
    ) -> OrchestratorResult<Option<JobStatus>> {
        if job.is_complete() {
            warn!(job_id = %job.job_id, status = %job.status, "Job already finalized");
            return Ok(None);
        }
        let status = self.final_status(tx, job.job_id).await?;
        self.complete_job(tx, job, status, None).await
    }

    /// Move the job to a terminal status and persist it.
    ///
    /// Returns `None` when the job was already terminal.
    pub async fn complete_job(
        &self,
        tx: &mut dyn StoreTransaction,
        job: &mut Job,
        status: JobStatus,
        message: Option<String>,
    ) -> OrchestratorResult<Option<JobStatus>> {
        if job.is_complete() {
            warn!(
                job_id = %job.job_id,
                status = %job.status,
                requested = %status,
                "Ignoring completion of a job that is already terminal"
            );
            return Ok(None);
        }
        let status = job.complete(status, message)?;
        tx.save_job(job).await?;
        log_job_operation("complete", job.job_id, status.as_str(), job.message.as_deref());
        Ok(Some(status))
    }

    /// Record a data link for every asset of every item in the result catalogs
    pub async fn add_links_for_results(
        &self,
        tx: &mut dyn StoreTransaction,
        job_id: Uuid,
        results: &[String],
    ) -> OrchestratorResult<usize> {
        let mut links = Vec::new();
        for catalog_location in results {
            debug!(job_id = %job_id, catalog_location = %catalog_location, "Adding links for catalog");
            let items = read_catalog_items(self.object_store.as_ref(), catalog_location).await?;
            for item in &items {
                links.extend(
                    item.assets
                        .values()
                        .map(|asset| NewJobLink::from_asset(job_id, item, asset)),
                );
            }
        }
        let count = links.len();
        tx.add_job_links(links).await?;
        info!(job_id = %job_id, link_count = count, "Recorded job links");
        Ok(count)
    }
}
