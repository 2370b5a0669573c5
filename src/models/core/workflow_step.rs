//! # Workflow Step Model
//!
//! Per-job, per-step metadata. Steps are addressed by `(job_id, step_index)` and work
//! items refer to them by index only, so expected counts can be corrected after
//! discovery learns the real granule total without touching any work item.
//!
//! ## Database Schema
//!
//! Maps to `workflow_steps`:
//! ```sql
//! CREATE TABLE workflow_steps (
//!   job_id UUID NOT NULL REFERENCES jobs (job_id) ON DELETE CASCADE,
//!   step_index INTEGER NOT NULL,
//!   service_id TEXT NOT NULL,
//!   role TEXT NOT NULL,
//!   work_item_count INTEGER NOT NULL,
//!   has_aggregated_output BOOLEAN NOT NULL DEFAULT false,
//!   PRIMARY KEY (job_id, step_index)
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a step does in the workflow, decided once when the workflow is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Determines the job's input granules; paginated and throttled
    Discovery,
    /// Any other processing service
    Service,
}

impl StepRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "service" => Ok(Self::Service),
            _ => Err(format!("Invalid step role: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub job_id: Uuid,
    pub step_index: i32,
    pub service_id: String,
    pub role: StepRole,
    /// Number of work items expected to complete for this step
    pub work_item_count: i32,
    /// The single item of this step waits for every item of the previous step
    pub has_aggregated_output: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New WorkflowStep for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowStep {
    pub job_id: Uuid,
    pub step_index: i32,
    pub service_id: String,
    pub role: StepRole,
    pub work_item_count: i32,
    pub has_aggregated_output: bool,
}

impl NewWorkflowStep {
    pub fn into_step(self, now: DateTime<Utc>) -> WorkflowStep {
        WorkflowStep {
            job_id: self.job_id,
            step_index: self.step_index,
            service_id: self.service_id,
            role: self.role,
            work_item_count: self.work_item_count,
            has_aggregated_output: self.has_aggregated_output,
            created_at: now,
            updated_at: now,
        }
    }
}

impl WorkflowStep {
    pub fn is_discovery(&self) -> bool {
        self.role == StepRole::Discovery
    }

    /// Expected item count for this step given the job's granule estimate
    pub fn expected_work_item_count(&self, num_input_granules: i32, discovery_page_size: i64) -> i32 {
        if self.is_discovery() {
            let page_size = discovery_page_size.max(1);
            let granules = i64::from(num_input_granules.max(0));
            // ceil without floating point
            ((granules + page_size - 1) / page_size) as i32
        } else if !self.has_aggregated_output {
            num_input_granules
        } else {
            1
        }
    }
}
