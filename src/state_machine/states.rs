use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, no work dispatched yet
    Accepted,
    /// Work is being dispatched and processed
    Running,
    /// Processing continues after at least one permanent item failure
    RunningWithErrors,
    /// Pre-execution preview; pauses as soon as any chain finishes
    Previewing,
    /// Paused by the user or by the preview policy
    Paused,
    /// Every item finished without error
    Successful,
    /// Finished with errors but produced at least one output link
    CompleteWithErrors,
    /// Finished with errors and no output, or aborted
    Failed,
    /// Canceled by the user
    Canceled,
}

impl JobStatus {
    /// Terminal statuses accept no further item updates except cancellation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::CompleteWithErrors | Self::Failed | Self::Canceled
        )
    }

    /// Whether work items for a job in this status may be handed out
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Running | Self::RunningWithErrors | Self::Previewing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::RunningWithErrors => "running_with_errors",
            Self::Previewing => "previewing",
            Self::Paused => "paused",
            Self::Successful => "successful",
            Self::CompleteWithErrors => "complete_with_errors",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Statuses from which dispatch may hand out work, as stored strings
    pub fn dispatchable_strs() -> Vec<&'static str> {
        [
            Self::Accepted,
            Self::Running,
            Self::RunningWithErrors,
            Self::Previewing,
        ]
        .iter()
        .map(JobStatus::as_str)
        .collect()
    }

    pub fn terminal_strs() -> Vec<&'static str> {
        [
            Self::Successful,
            Self::CompleteWithErrors,
            Self::Failed,
            Self::Canceled,
        ]
        .iter()
        .map(JobStatus::as_str)
        .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "running" => Ok(Self::Running),
            "running_with_errors" => Ok(Self::RunningWithErrors),
            "previewing" => Ok(Self::Previewing),
            "paused" => Ok(Self::Paused),
            "successful" => Ok(Self::Successful),
            "complete_with_errors" => Ok(Self::CompleteWithErrors),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Accepted
    }
}

/// Work item status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting in the dispatch pool
    Ready,
    /// Held by exactly one worker
    Running,
    Successful,
    Failed,
    Canceled,
}

pub const ALL_WORK_ITEM_STATUSES: [WorkItemStatus; 5] = [
    WorkItemStatus::Ready,
    WorkItemStatus::Running,
    WorkItemStatus::Successful,
    WorkItemStatus::Failed,
    WorkItemStatus::Canceled,
];

/// Statuses after which an item accepts no further updates
pub const COMPLETED_WORK_ITEM_STATUSES: [WorkItemStatus; 3] = [
    WorkItemStatus::Successful,
    WorkItemStatus::Failed,
    WorkItemStatus::Canceled,
];

impl WorkItemStatus {
    pub fn is_completed(&self) -> bool {
        COMPLETED_WORK_ITEM_STATUSES.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid work item status: {s}")),
        }
    }
}

impl Default for WorkItemStatus {
    fn default() -> Self {
        Self::Ready
    }
}
