use serde::{Deserialize, Serialize};

use super::states::JobStatus;

/// Events that drive job status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// First work item dispatched
    Start,
    /// A permanent item failure was absorbed by the error budget
    RecordError,
    /// Preview policy or user pause
    Pause,
    /// Resume a paused job
    Resume,
    /// Terminal transition with the final status
    Complete(JobStatus),
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::RecordError => "record_error",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete(_) => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Events that drive work item status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkItemEvent {
    /// Handed to a worker
    Dispatch,
    Succeed,
    /// Failure reported by the worker
    Fail(Option<String>),
    /// Failure with retry budget remaining, item goes back to the pool
    Retry,
    Cancel,
}

impl WorkItemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Succeed => "succeed",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => msg.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(JobEvent::Complete(JobStatus::Failed).event_type(), "complete");
        assert!(JobEvent::Complete(JobStatus::Successful).is_terminal());
        assert!(!JobEvent::Pause.is_terminal());
        assert_eq!(WorkItemEvent::Retry.event_type(), "retry");
        assert_eq!(
            WorkItemEvent::Fail(Some("boom".to_string())).error_message(),
            Some("boom")
        );
        assert_eq!(WorkItemEvent::Fail(None).error_message(), None);
    }
}
