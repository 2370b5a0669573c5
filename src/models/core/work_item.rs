//! # Work Item Model
//!
//! One schedulable unit of execution for a workflow step: typically one granule, one
//! discovery page, or one aggregated batch.
//!
//! ## State Machine
//!
//! READY -> RUNNING -> {SUCCESSFUL, FAILED, CANCELED}. A failure with retry budget left
//! goes back to READY. Dispatch is the only READY -> RUNNING path and happens under a
//! row lock, so exactly one worker holds an item at a time.
//!
//! Items are never deleted during processing; they stay for progress accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::artifacts;
use crate::state_machine::{StateMachineResult, WorkItemEvent, WorkItemStateMachine, WorkItemStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub job_id: Uuid,
    pub service_id: String,
    pub workflow_step_index: i32,
    pub status: WorkItemStatus,
    pub retry_count: i32,
    /// Input catalog produced by the previous step, or a discovery cursor seed
    pub catalog_location: Option<String>,
    /// Pagination cursor carried between discovery pages
    pub scroll_id: Option<String>,
    /// Opaque operation parameters handed to the worker
    pub operation: serde_json::Value,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub total_granules_size: f64,
    /// Sizes of the individual outputs reported on success
    pub output_item_sizes: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New WorkItem for creation; always inserted as READY
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub job_id: Uuid,
    pub service_id: String,
    pub workflow_step_index: i32,
    pub catalog_location: Option<String>,
    pub scroll_id: Option<String>,
    pub operation: serde_json::Value,
}

impl NewWorkItem {
    pub fn new(job_id: Uuid, service_id: impl Into<String>, workflow_step_index: i32) -> Self {
        Self {
            job_id,
            service_id: service_id.into(),
            workflow_step_index,
            catalog_location: None,
            scroll_id: None,
            operation: serde_json::Value::Null,
        }
    }

    pub fn with_catalog_location(mut self, location: impl Into<String>) -> Self {
        self.catalog_location = Some(location.into());
        self
    }

    pub fn with_scroll_id(mut self, scroll_id: Option<String>) -> Self {
        self.scroll_id = scroll_id;
        self
    }

    pub fn with_operation(mut self, operation: serde_json::Value) -> Self {
        self.operation = operation;
        self
    }

    pub fn into_work_item(self, id: i64, now: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id,
            job_id: self.job_id,
            service_id: self.service_id,
            workflow_step_index: self.workflow_step_index,
            status: WorkItemStatus::Ready,
            retry_count: 0,
            catalog_location: self.catalog_location,
            scroll_id: self.scroll_id,
            operation: self.operation,
            started_at: None,
            duration_ms: 0,
            total_granules_size: 0.0,
            output_item_sizes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl WorkItem {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Apply a status event, returning the new status
    pub fn apply(&mut self, event: WorkItemEvent) -> StateMachineResult<WorkItemStatus> {
        let target = WorkItemStateMachine::determine_target_state(self.status, &event)?;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(target)
    }

    /// Output namespace owned by this item: `{root}/{job_id}/{id}/outputs/`
    pub fn output_dir(&self, artifact_root: &str) -> String {
        format!(
            "{}/{}/{}/{}/",
            artifact_root.trim_end_matches('/'),
            self.job_id,
            self.id,
            artifacts::OUTPUTS_DIR
        )
    }

    /// Location of a named artifact inside this item's output namespace
    pub fn output_location(&self, artifact_root: &str, file_name: &str) -> String {
        format!("{}{}", self.output_dir(artifact_root), file_name)
    }

    /// Location of the `index`-th aggregated catalog page written by this item
    pub fn aggregate_page_location(&self, artifact_root: &str, index: usize) -> String {
        self.output_location(
            artifact_root,
            &format!("{}/catalog{index}.json", artifacts::AGGREGATE_DIR),
        )
    }

    /// Milliseconds elapsed since dispatch, as observed by the orchestrator
    pub fn observed_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0))
            .unwrap_or(0)
    }
}
