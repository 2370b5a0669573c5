// State machines for jobs and work items.
//
// Both are pure transition tables; the update processor persists the results inside
// the job-then-item locking transaction.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;
pub mod work_item_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{JobEvent, WorkItemEvent};
pub use job_state_machine::JobStateMachine;
pub use states::{
    JobStatus, WorkItemStatus, ALL_WORK_ITEM_STATUSES, COMPLETED_WORK_ITEM_STATUSES,
};
pub use work_item_state_machine::WorkItemStateMachine;
