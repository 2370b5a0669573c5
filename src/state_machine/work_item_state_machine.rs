use super::{
    errors::{StateMachineError, StateMachineResult},
    events::WorkItemEvent,
    states::WorkItemStatus,
};

/// Transition table for a single work item.
///
/// Persistence is the caller's concern; this only decides whether an event is legal
/// from a given status and what the resulting status is.
pub struct WorkItemStateMachine;

impl WorkItemStateMachine {
    pub fn determine_target_state(
        current: WorkItemStatus,
        event: &WorkItemEvent,
    ) -> StateMachineResult<WorkItemStatus> {
        let target = match (current, event) {
            (WorkItemStatus::Ready, WorkItemEvent::Dispatch) => WorkItemStatus::Running,

            // A report may arrive for an item that was already put back in the pool by a
            // retry: the first attempt's worker finished late.
            (WorkItemStatus::Running | WorkItemStatus::Ready, WorkItemEvent::Succeed) => {
                WorkItemStatus::Successful
            }
            (WorkItemStatus::Running | WorkItemStatus::Ready, WorkItemEvent::Fail(_)) => {
                WorkItemStatus::Failed
            }
            (WorkItemStatus::Running | WorkItemStatus::Ready, WorkItemEvent::Retry) => {
                WorkItemStatus::Ready
            }
            (WorkItemStatus::Running | WorkItemStatus::Ready, WorkItemEvent::Cancel) => {
                WorkItemStatus::Canceled
            }

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Map a worker-reported status onto the event it represents
    pub fn event_for_reported_status(
        status: WorkItemStatus,
        error_message: Option<&str>,
    ) -> StateMachineResult<WorkItemEvent> {
        match status {
            WorkItemStatus::Successful => Ok(WorkItemEvent::Succeed),
            WorkItemStatus::Failed => Ok(WorkItemEvent::Fail(error_message.map(String::from))),
            WorkItemStatus::Canceled => Ok(WorkItemEvent::Cancel),
            other => Err(StateMachineError::InvalidTransition {
                from: None,
                to: other.to_string(),
            }),
        }
    }
}
