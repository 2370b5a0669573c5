pub mod core;

// Re-export core models for easy access
pub use self::core::{
    Job, JobError, JobLink, NewJob, NewJobError, NewJobLink, NewWorkItem, NewWorkflowStep,
    StepRole, TemporalRange, WorkItem, WorkflowStep,
};
