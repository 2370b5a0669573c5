//! # Job Model
//!
//! A submitted processing request. Owns its workflow steps, work items, errors and
//! output links. Status only ever moves toward a terminal value; once terminal the
//! job accepts no further item updates except cancellation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::{JobEvent, JobStateMachine, JobStatus, StateMachineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub username: String,
    pub status: JobStatus,
    pub message: Option<String>,
    /// Percentage complete, 0-100. Only reaches 100 on a successful completion.
    pub progress: i32,
    pub batches_completed: i32,
    /// Estimate of matching granules; discovery may shrink it as hit counts arrive
    pub num_input_granules: i32,
    pub ignore_errors: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Job for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_id: Uuid,
    pub username: String,
    pub status: JobStatus,
    pub num_input_granules: i32,
    pub ignore_errors: bool,
}

impl NewJob {
    pub fn new(username: impl Into<String>, num_input_granules: i32) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            username: username.into(),
            status: JobStatus::Running,
            num_input_granules,
            ignore_errors: false,
        }
    }

    pub fn with_ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            job_id: self.job_id,
            username: self.username,
            status: self.status,
            message: None,
            progress: 0,
            batches_completed: 0,
            num_input_granules: self.num_input_granules,
            ignore_errors: self.ignore_errors,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Job {
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status event, returning the new status
    pub fn apply(&mut self, event: JobEvent) -> StateMachineResult<JobStatus> {
        let target = JobStateMachine::determine_target_state(self.status, &event)?;
        self.status = target;
        self.updated_at = Utc::now();
        Ok(target)
    }

    /// Record that one more chain (granule or aggregated batch) has finished.
    ///
    /// Progress is capped at 99 here; only completion sets it to 100.
    pub fn complete_batch(&mut self, total_item_count: i32) {
        self.batches_completed += 1;
        let total = f64::from(total_item_count.max(1));
        let progress = (100.0 * f64::from(self.batches_completed) / total).clamp(0.0, 99.0);
        self.progress = progress.floor() as i32;
        self.updated_at = Utc::now();
    }

    pub fn pause(&mut self) -> StateMachineResult<JobStatus> {
        self.apply(JobEvent::Pause)
    }

    /// Terminal transition with an optional message
    pub fn complete(
        &mut self,
        status: JobStatus,
        message: Option<String>,
    ) -> StateMachineResult<JobStatus> {
        let target = self.apply(JobEvent::Complete(status))?;
        if matches!(
            target,
            JobStatus::Successful | JobStatus::CompleteWithErrors
        ) {
            self.progress = 100;
        }
        if message.is_some() {
            self.message = message;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_job(num_input_granules: i32) -> Job {
        NewJob::new("joe", num_input_granules).into_job(Utc::now())
    }

    #[test]
    fn test_complete_batch_caps_progress() {
        let mut job = running_job(2);
        job.complete_batch(2);
        assert_eq!(job.progress, 50);
        job.complete_batch(2);
        assert_eq!(job.progress, 99);
        assert_eq!(job.batches_completed, 2);
    }

    #[test]
    fn test_complete_batch_with_zero_total() {
        let mut job = running_job(0);
        job.complete_batch(0);
        assert_eq!(job.progress, 99);
    }

    #[test]
    fn test_complete_sets_progress_and_message() {
        let mut job = running_job(1);
        job.complete(JobStatus::Successful, None).unwrap();
        assert_eq!(job.progress, 100);
        assert!(job.is_complete());

        let mut job = running_job(1);
        job.complete(JobStatus::Failed, Some("boom".to_string()))
            .unwrap();
        assert_eq!(job.progress, 0);
        assert_eq!(job.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let mut job = running_job(1);
        job.complete(JobStatus::Successful, None).unwrap();
        assert!(job.complete(JobStatus::Failed, None).is_err());
        assert_eq!(job.status, JobStatus::Successful);
    }
}
