//! Work item update payloads and the outcomes of processing them.

use serde::{Deserialize, Serialize};

use crate::state_machine::{JobStatus, WorkItemStatus};

/// Update reported by a worker for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemUpdate {
    pub work_item_id: i64,
    pub status: WorkItemStatus,
    /// Output catalog locations produced on success
    #[serde(default)]
    pub results: Vec<String>,
    /// Discovery only: actual number of matching granules
    #[serde(default)]
    pub hits: Option<i32>,
    /// Discovery only: cursor for the next page
    #[serde(default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub total_granules_size: Option<f64>,
    #[serde(default)]
    pub output_item_sizes: Vec<f64>,
    /// Duration measured by the worker
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl WorkItemUpdate {
    fn new(work_item_id: i64, status: WorkItemStatus) -> Self {
        Self {
            work_item_id,
            status,
            results: Vec::new(),
            hits: None,
            scroll_id: None,
            error_message: None,
            total_granules_size: None,
            output_item_sizes: Vec::new(),
            duration_ms: None,
        }
    }

    pub fn succeeded(work_item_id: i64, results: Vec<String>) -> Self {
        Self {
            results,
            ..Self::new(work_item_id, WorkItemStatus::Successful)
        }
    }

    pub fn failed(work_item_id: i64, error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Self::new(work_item_id, WorkItemStatus::Failed)
        }
    }

    pub fn canceled(work_item_id: i64) -> Self {
        Self::new(work_item_id, WorkItemStatus::Canceled)
    }

    pub fn with_hits(mut self, hits: i32) -> Self {
        self.hits = Some(hits);
        self
    }

    pub fn with_scroll_id(mut self, scroll_id: impl Into<String>) -> Self {
        self.scroll_id = Some(scroll_id.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_total_granules_size(mut self, size: f64) -> Self {
        self.total_granules_size = Some(size);
        self
    }
}

/// Why an update was dropped without effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The job already reached a terminal status
    JobTerminal,
    /// The item already reached a completed status
    ItemCompleted,
    /// Workers may only report completed statuses
    UnsupportedStatus,
}

/// Result of processing one update. Only store and I/O failures are errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Discarded { reason: DiscardReason },
    Canceled,
    /// Failed with retry budget left; back in the dispatch pool
    Retried { retry_count: i32 },
    /// Downstream work was created (or is awaiting aggregation)
    Advanced { created_work_items: usize },
    /// This chain ended and the job keeps running
    ChainCompleted { job_status: JobStatus },
    /// The job reached a terminal status while processing this update
    JobFinished { job_status: JobStatus },
}

impl UpdateOutcome {
    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded { .. })
    }
}
