//! # System Constants
//!
//! Defaults and fixed names that define the operational boundaries of the
//! orchestrator: artifact file-name conventions, job messages and configuration
//! defaults.

pub use crate::state_machine::{JobStatus, WorkItemStatus, COMPLETED_WORK_ITEM_STATUSES};

/// Artifact file-name conventions inside a work item's output namespace
pub mod artifacts {
    /// Primary output catalog for single-batch work items
    pub const CATALOG_FILE: &str = "catalog.json";
    /// Index of catalogs written by work items that produced more than one batch
    pub const BATCH_CATALOGS_FILE: &str = "batch-catalogs.json";
    /// Error detail file a worker may leave behind on failure
    pub const ERROR_FILE: &str = "error.json";
    /// Sub-directory holding aggregated catalog pages
    pub const AGGREGATE_DIR: &str = "aggregate";
    /// Output sub-directory of every work item namespace
    pub const OUTPUTS_DIR: &str = "outputs";
    /// Pattern matched by catalog files a worker writes into its output directory
    pub const CATALOG_FILE_PATTERN: &str = r"^catalog\d*\.json$";
    pub const STAC_VERSION: &str = "1.0.0-beta.2";
    pub const JSON_MEDIA_TYPE: &str = "application/json";
}

/// Link relations used in catalogs and job links
pub mod rels {
    pub const ITEM: &str = "item";
    pub const PREV: &str = "prev";
    pub const NEXT: &str = "next";
    pub const DATA: &str = "data";
}

/// Messages recorded on jobs and job errors
pub mod messages {
    /// Resource locator recorded when a failed item's input cannot be read
    pub const UNKNOWN_URL: &str = "unknown";
    pub const NEXT_WORK_ITEMS_MISSING: &str =
        "Internal failure: could not create the next work items for the request.";
    pub const WORKER_TIMED_OUT: &str = "Worker timed out";
    pub const UNKNOWN_WORKER_ERROR: &str = "Unknown error";

    pub fn work_item_failed(work_item_id: i64, error: &str) -> String {
        format!("WorkItem [{work_item_id}] failed with error: {error}")
    }

    pub fn discovery_failed(work_item_id: i64) -> String {
        format!("WorkItem [{work_item_id}] failed to query for granule information")
    }

    pub fn unknown_failure(work_item_id: i64) -> String {
        format!("WorkItem [{work_item_id}] failed with an unknown error")
    }

    pub fn max_errors_exceeded(max_errors: i64) -> String {
        format!("Maximum allowed errors {max_errors} exceeded")
    }

    pub fn aggregation_incomplete(step_index: i32) -> String {
        format!("Internal failure: failed to retrieve all work items for step {step_index}")
    }
}

/// Configuration defaults
pub mod system {
    pub const DEFAULT_DISCOVERY_MAX_PAGE_SIZE: i64 = 2000;
    pub const DEFAULT_WORK_ITEM_RETRY_LIMIT: i32 = 1;
    pub const DEFAULT_MAX_ERRORS_FOR_JOB: i64 = 100;
    pub const DEFAULT_AGGREGATION_PAGE_SIZE: usize = 10_000;
    pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_GET_WORK_MAX_TRIES: u32 = 1;
    pub const DEFAULT_GET_WORK_RETRY_DELAY_MS: u64 = 120_000;
    /// Work items read per page when walking a step's items
    pub const WORK_ITEM_PAGE_SIZE: i64 = 100;
    pub const DEFAULT_UPDATE_QUEUE_CAPACITY: usize = 1000;
    pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_REDELIVERY_DELAY_MS: u64 = 1000;
    pub const DEFAULT_REAPER_TIMEOUT_SECONDS: i64 = 3600;
    pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 60;
}
