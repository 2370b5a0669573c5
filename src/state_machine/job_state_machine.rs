use super::{
    errors::{StateMachineError, StateMachineResult},
    events::JobEvent,
    states::JobStatus,
};

/// Transition table for job status.
///
/// Terminal statuses are absorbing: every event from a terminal status is rejected,
/// which is what makes finalization idempotent under racing updates.
pub struct JobStateMachine;

impl JobStateMachine {
    pub fn determine_target_state(
        current: JobStatus,
        event: &JobEvent,
    ) -> StateMachineResult<JobStatus> {
        if current.is_terminal() {
            return Err(StateMachineError::InvalidTransition {
                from: Some(current.to_string()),
                to: event.event_type().to_string(),
            });
        }

        let target = match (current, event) {
            (JobStatus::Accepted, JobEvent::Start) => JobStatus::Running,

            (JobStatus::Running, JobEvent::RecordError) => JobStatus::RunningWithErrors,
            // Only a running job is relabelled; other statuses keep their meaning
            (other, JobEvent::RecordError) => other,

            (
                JobStatus::Accepted
                | JobStatus::Running
                | JobStatus::RunningWithErrors
                | JobStatus::Previewing,
                JobEvent::Pause,
            ) => JobStatus::Paused,

            (JobStatus::Paused, JobEvent::Resume) => JobStatus::Running,

            (_, JobEvent::Complete(status)) if status.is_terminal() => *status,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: format!("{event:?}"),
                })
            }
        };

        Ok(target)
    }
}
