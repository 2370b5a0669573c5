use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A permanent work item failure recorded against a job. Append-only; the count
/// drives the error-budget decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub id: i64,
    pub job_id: Uuid,
    /// Offending resource locator, or "unknown"
    pub url: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobError {
    pub job_id: Uuid,
    pub url: String,
    pub message: String,
}

impl NewJobError {
    pub fn into_job_error(self, id: i64, now: DateTime<Utc>) -> JobError {
        JobError {
            id,
            job_id: self.job_id,
            url: self.url,
            message: self.message,
            created_at: now,
        }
    }
}
