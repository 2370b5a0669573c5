//! Core persisted models: jobs, their workflow steps and work items, plus the
//! append-only error and output-link records.

pub mod job;
pub mod job_error;
pub mod job_link;
pub mod work_item;
pub mod workflow_step;

pub use job::{Job, NewJob};
pub use job_error::{JobError, NewJobError};
pub use job_link::{JobLink, NewJobLink, TemporalRange};
pub use work_item::{NewWorkItem, WorkItem};
pub use workflow_step::{NewWorkflowStep, StepRole, WorkflowStep};
