//! # PostgreSQL Work Item Store
//!
//! Row locks come straight from Postgres: `FOR UPDATE` for the job and item locks
//! taken during update ingestion, `FOR UPDATE SKIP LOCKED` for dispatch so two
//! workers asking for the same service never block on, or receive, the same row.
//!
//! Statuses are stored as their snake_case strings and decoded on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::store::{StoreTransaction, WorkItemStore};
use crate::config::DatabaseConfig;
use crate::constants::rels;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::models::{
    Job, JobError, JobLink, NewJob, NewJobError, NewJobLink, NewWorkItem, NewWorkflowStep,
    TemporalRange, WorkItem, WorkflowStep,
};
use crate::state_machine::{JobStatus, WorkItemStatus};

const JOB_COLUMNS: &str = "job_id, username, status, message, progress, batches_completed, \
     num_input_granules, ignore_errors, created_at, updated_at";

const STEP_COLUMNS: &str = "job_id, step_index, service_id, role, work_item_count, \
     has_aggregated_output, created_at, updated_at";

const WORK_ITEM_COLUMNS: &str = "id, job_id, service_id, workflow_step_index, status, \
     retry_count, catalog_location, scroll_id, operation, started_at, duration_ms, \
     total_granules_size, output_item_sizes, created_at, updated_at";

const JOB_LINK_COLUMNS: &str = "id, job_id, href, media_type, title, rel, temporal_start, \
     temporal_end, bbox, created_at";

#[derive(Debug, Clone)]
pub struct PgWorkItemStore {
    pool: PgPool,
}

impl PgWorkItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized from configuration
    pub async fn connect(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkItemStore for PgWorkItemStore {
    async fn begin(&self) -> OrchestratorResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

fn decode<T>(column: &str, value: &str) -> OrchestratorResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse::<T>()
        .map_err(|e| OrchestratorError::DatabaseError(format!("Invalid {column} value: {e}")))
}

fn status_strings(statuses: &[WorkItemStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn owned(strs: Vec<&'static str>) -> Vec<String> {
    strs.into_iter().map(str::to_string).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    username: String,
    status: String,
    message: Option<String>,
    progress: i32,
    batches_completed: i32,
    num_input_granules: i32,
    ignore_errors: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = OrchestratorError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            job_id: row.job_id,
            username: row.username,
            status: decode::<JobStatus>("jobs.status", &row.status)?,
            message: row.message,
            progress: row.progress,
            batches_completed: row.batches_completed,
            num_input_granules: row.num_input_granules,
            ignore_errors: row.ignore_errors,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StepRow {
    job_id: Uuid,
    step_index: i32,
    service_id: String,
    role: String,
    work_item_count: i32,
    has_aggregated_output: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StepRow> for WorkflowStep {
    type Error = OrchestratorError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(WorkflowStep {
            job_id: row.job_id,
            step_index: row.step_index,
            service_id: row.service_id,
            role: decode("workflow_steps.role", &row.role)?,
            work_item_count: row.work_item_count,
            has_aggregated_output: row.has_aggregated_output,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WorkItemRow {
    id: i64,
    job_id: Uuid,
    service_id: String,
    workflow_step_index: i32,
    status: String,
    retry_count: i32,
    catalog_location: Option<String>,
    scroll_id: Option<String>,
    operation: serde_json::Value,
    started_at: Option<DateTime<Utc>>,
    duration_ms: i64,
    total_granules_size: f64,
    output_item_sizes: Vec<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = OrchestratorError;

    fn try_from(row: WorkItemRow) -> Result<Self, Self::Error> {
        Ok(WorkItem {
            id: row.id,
            job_id: row.job_id,
            service_id: row.service_id,
            workflow_step_index: row.workflow_step_index,
            status: decode::<WorkItemStatus>("work_items.status", &row.status)?,
            retry_count: row.retry_count,
            catalog_location: row.catalog_location,
            scroll_id: row.scroll_id,
            operation: row.operation,
            started_at: row.started_at,
            duration_ms: row.duration_ms,
            total_granules_size: row.total_granules_size,
            output_item_sizes: row.output_item_sizes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobLinkRow {
    id: i64,
    job_id: Uuid,
    href: String,
    media_type: Option<String>,
    title: Option<String>,
    rel: String,
    temporal_start: Option<DateTime<Utc>>,
    temporal_end: Option<DateTime<Utc>>,
    bbox: Option<Vec<f64>>,
    created_at: DateTime<Utc>,
}

impl From<JobLinkRow> for JobLink {
    fn from(row: JobLinkRow) -> Self {
        let temporal = match (row.temporal_start, row.temporal_end) {
            (Some(start), Some(end)) => Some(TemporalRange { start, end }),
            _ => None,
        };
        JobLink {
            id: row.id,
            job_id: row.job_id,
            href: row.href,
            media_type: row.media_type,
            title: row.title,
            rel: row.rel,
            temporal,
            bbox: row.bbox,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_job(&mut self, job: NewJob) -> OrchestratorResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO jobs (job_id, username, status, num_input_granules, ignore_errors) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {JOB_COLUMNS}"
        ))
        .bind(job.job_id)
        .bind(&job.username)
        .bind(job.status.as_str())
        .bind(job.num_input_granules)
        .bind(job.ignore_errors)
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn get_job(&mut self, job_id: Uuid) -> OrchestratorResult<Option<Job>> {
        sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn lock_job(&mut self, job_id: Uuid) -> OrchestratorResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(OrchestratorError::JobNotFound(job_id))?;
        row.try_into()
    }

    async fn save_job(&mut self, job: &Job) -> OrchestratorResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, message = $3, progress = $4, batches_completed = $5, \
             num_input_granules = $6, ignore_errors = $7, updated_at = now() \
             WHERE job_id = $1",
        )
        .bind(job.job_id)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(job.progress)
        .bind(job.batches_completed)
        .bind(job.num_input_granules)
        .bind(job.ignore_errors)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::JobNotFound(job.job_id));
        }
        Ok(())
    }

    async fn insert_workflow_steps(
        &mut self,
        steps: Vec<NewWorkflowStep>,
    ) -> OrchestratorResult<Vec<WorkflowStep>> {
        if steps.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO workflow_steps \
             (job_id, step_index, service_id, role, work_item_count, has_aggregated_output) ",
        );
        builder.push_values(&steps, |mut b, step| {
            b.push_bind(step.job_id)
                .push_bind(step.step_index)
                .push_bind(&step.service_id)
                .push_bind(step.role.as_str())
                .push_bind(step.work_item_count)
                .push_bind(step.has_aggregated_output);
        });
        builder.push(format!(" RETURNING {STEP_COLUMNS}"));

        let rows = builder
            .build_query_as::<StepRow>()
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(WorkflowStep::try_from).collect()
    }

    async fn workflow_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
    ) -> OrchestratorResult<Option<WorkflowStep>> {
        sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE job_id = $1 AND step_index = $2"
        ))
        .bind(job_id)
        .bind(step_index)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(WorkflowStep::try_from)
        .transpose()
    }

    async fn workflow_steps(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<WorkflowStep>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE job_id = $1 ORDER BY step_index"
        ))
        .bind(job_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(WorkflowStep::try_from).collect()
    }

    async fn save_workflow_step(&mut self, step: &WorkflowStep) -> OrchestratorResult<()> {
        let result = sqlx::query(
            "UPDATE workflow_steps SET work_item_count = $3, has_aggregated_output = $4, \
             updated_at = now() WHERE job_id = $1 AND step_index = $2",
        )
        .bind(step.job_id)
        .bind(step.step_index)
        .bind(step.work_item_count)
        .bind(step.has_aggregated_output)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::WorkflowStepNotFound {
                job_id: step.job_id,
                step_index: step.step_index,
            });
        }
        Ok(())
    }

    async fn get_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<Option<WorkItem>> {
        sqlx::query_as::<_, WorkItemRow>(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = $1"
        ))
        .bind(work_item_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(WorkItem::try_from)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn lock_work_item(&mut self, work_item_id: i64) -> OrchestratorResult<WorkItem> {
        let row = sqlx::query_as::<_, WorkItemRow>(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = $1 FOR UPDATE"
        ))
        .bind(work_item_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(OrchestratorError::WorkItemNotFound(work_item_id))?;
        row.try_into()
    }

    async fn save_work_item(&mut self, item: &WorkItem) -> OrchestratorResult<()> {
        let result = sqlx::query(
            "UPDATE work_items SET status = $2, retry_count = $3, catalog_location = $4, \
             scroll_id = $5, started_at = $6, duration_ms = $7, total_granules_size = $8, \
             output_item_sizes = $9, updated_at = now() WHERE id = $1",
        )
        .bind(item.id)
        .bind(item.status.as_str())
        .bind(item.retry_count)
        .bind(&item.catalog_location)
        .bind(&item.scroll_id)
        .bind(item.started_at)
        .bind(item.duration_ms)
        .bind(item.total_granules_size)
        .bind(&item.output_item_sizes)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrchestratorError::WorkItemNotFound(item.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_next_work_item(
        &mut self,
        service_id: &str,
    ) -> OrchestratorResult<Option<WorkItem>> {
        let columns = WORK_ITEM_COLUMNS
            .split(", ")
            .map(|c| format!("w.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let row = sqlx::query_as::<_, WorkItemRow>(&format!(
            "SELECT {columns} FROM work_items w \
             JOIN jobs j ON j.job_id = w.job_id \
             WHERE w.service_id = $1 AND w.status = $2 AND j.status = ANY($3) \
             ORDER BY w.id \
             LIMIT 1 \
             FOR UPDATE OF w SKIP LOCKED"
        ))
        .bind(service_id)
        .bind(WorkItemStatus::Ready.as_str())
        .bind(owned(JobStatus::dispatchable_strs()))
        .fetch_optional(&mut *self.tx)
        .await?;

        debug!(service_id = %service_id, claimed = row.is_some(), "Dispatch query complete");
        row.map(WorkItem::try_from).transpose()
    }

    async fn insert_work_items(
        &mut self,
        items: &[NewWorkItem],
    ) -> OrchestratorResult<Vec<WorkItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO work_items (job_id, service_id, workflow_step_index, status, \
             catalog_location, scroll_id, operation) ",
        );
        builder.push_values(items, |mut b, item| {
            b.push_bind(item.job_id)
                .push_bind(&item.service_id)
                .push_bind(item.workflow_step_index)
                .push_bind(WorkItemStatus::Ready.as_str())
                .push_bind(&item.catalog_location)
                .push_bind(&item.scroll_id)
                .push_bind(&item.operation);
        });
        builder.push(format!(" RETURNING {WORK_ITEM_COLUMNS}"));

        let rows = builder
            .build_query_as::<WorkItemRow>()
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(WorkItem::try_from).collect()
    }

    async fn work_item_count_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        statuses: &[WorkItemStatus],
    ) -> OrchestratorResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM work_items \
             WHERE job_id = $1 AND workflow_step_index = $2 AND status = ANY($3)",
        )
        .bind(job_id)
        .bind(step_index)
        .bind(status_strings(statuses))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn work_items_for_step(
        &mut self,
        job_id: Uuid,
        step_index: i32,
        page: i64,
        page_size: i64,
    ) -> OrchestratorResult<Vec<WorkItem>> {
        if page < 1 || page_size < 1 {
            return Err(OrchestratorError::ValidationError(format!(
                "Invalid page {page} with size {page_size}"
            )));
        }
        let rows = sqlx::query_as::<_, WorkItemRow>(&format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM work_items \
             WHERE job_id = $1 AND workflow_step_index = $2 \
             ORDER BY id LIMIT $3 OFFSET $4"
        ))
        .bind(job_id)
        .bind(step_index)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(WorkItem::try_from).collect()
    }

    async fn orphaned_work_item_ids(&mut self) -> OrchestratorResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT w.id FROM work_items w JOIN jobs j ON j.job_id = w.job_id \
             WHERE w.status = ANY($1) AND j.status = ANY($2) ORDER BY w.id",
        )
        .bind(status_strings(&[WorkItemStatus::Ready, WorkItemStatus::Running]))
        .bind(owned(JobStatus::terminal_strs()))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn stale_running_work_item_ids(
        &mut self,
        started_before: DateTime<Utc>,
    ) -> OrchestratorResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT w.id FROM work_items w JOIN jobs j ON j.job_id = w.job_id \
             WHERE w.status = $1 AND w.started_at < $2 AND NOT (j.status = ANY($3)) \
             ORDER BY w.id",
        )
        .bind(WorkItemStatus::Running.as_str())
        .bind(started_before)
        .bind(owned(JobStatus::terminal_strs()))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn add_job_error(&mut self, error: NewJobError) -> OrchestratorResult<JobError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO job_errors (job_id, url, message) VALUES ($1, $2, $3) \
             RETURNING id, created_at",
        )
        .bind(error.job_id)
        .bind(&error.url)
        .bind(&error.message)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(error.into_job_error(id, created_at))
    }

    async fn job_error_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_errors WHERE job_id = $1")
                .bind(job_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(count)
    }

    async fn job_errors(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobError>> {
        let rows = sqlx::query_as::<_, (i64, Uuid, String, String, DateTime<Utc>)>(
            "SELECT id, job_id, url, message, created_at FROM job_errors \
             WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, job_id, url, message, created_at)| JobError {
                id,
                job_id,
                url,
                message,
                created_at,
            })
            .collect())
    }

    async fn add_job_links(&mut self, links: Vec<NewJobLink>) -> OrchestratorResult<Vec<JobLink>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO job_links \
             (job_id, href, media_type, title, rel, temporal_start, temporal_end, bbox) ",
        );
        builder.push_values(&links, |mut b, link| {
            b.push_bind(link.job_id)
                .push_bind(&link.href)
                .push_bind(&link.media_type)
                .push_bind(&link.title)
                .push_bind(&link.rel)
                .push_bind(link.temporal.map(|t| t.start))
                .push_bind(link.temporal.map(|t| t.end))
                .push_bind(&link.bbox);
        });
        builder.push(format!(" RETURNING {JOB_LINK_COLUMNS}"));

        let rows = builder
            .build_query_as::<JobLinkRow>()
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(JobLink::from).collect())
    }

    async fn job_data_link_count(&mut self, job_id: Uuid) -> OrchestratorResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM job_links WHERE job_id = $1 AND rel = $2",
        )
        .bind(job_id)
        .bind(rels::DATA)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn job_links(&mut self, job_id: Uuid) -> OrchestratorResult<Vec<JobLink>> {
        let rows = sqlx::query_as::<_, JobLinkRow>(&format!(
            "SELECT {JOB_LINK_COLUMNS} FROM job_links WHERE job_id = $1 ORDER BY id"
        ))
        .bind(job_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(JobLink::from).collect())
    }

    async fn commit(self: Box<Self>) -> OrchestratorResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrchestratorResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
