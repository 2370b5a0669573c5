//! # Orchestration Engine
//!
//! Reactive core that hands work to polling workers and turns their updates into
//! the next units of work.
//!
//! ## Architecture
//!
//! Every decision runs inside one store transaction that locks the job row and then
//! the work item row. Outcomes are values: stale and duplicate updates, retries and
//! job terminations are all reported through [`UpdateOutcome`], while only store and
//! object store failures surface as errors.
//!
//! ## Core Components
//!
//! - **WorkDispatcher**: claims the oldest READY item for a service
//! - **WorkItemUpdateProcessor**: guards, retries, failure policy, fan-out and finalization
//! - **DiscoveryThrottle**: page limit for discovery items
//! - **StepRegistry**: expected item counts per workflow step
//! - **FanOutEngine** / **Aggregator**: next-step work, one per result or one aggregated
//! - **FailurePolicy**: decides whether a permanent failure ends the job
//! - **JobFinalizer**: terminal status and output links
//! - **WorkItemUpdateQueue**: fire-and-forget intake with bounded redelivery
//! - **WorkItemReaper**: cancels orphaned items and times out silent workers

pub mod aggregation;
pub mod core;
pub mod discovery_throttle;
pub mod failure_policy;
pub mod fan_out;
pub mod job_finalizer;
pub mod reaper;
pub mod step_registry;
pub mod update_processor;
pub mod update_queue;
pub mod work_dispatcher;
pub mod work_item_update;

pub use aggregation::{paginate_links, AggregationOutcome, Aggregator};
pub use self::core::OrchestrationCore;
pub use discovery_throttle::{discovery_page_limit, DiscoveryThrottle};
pub use failure_policy::{failed_item_url, FailureDecision, FailurePolicy};
pub use fan_out::{FanOutEngine, NextWork};
pub use job_finalizer::JobFinalizer;
pub use reaper::{ReapSummary, WorkItemReaper};
pub use step_registry::StepRegistry;
pub use update_processor::WorkItemUpdateProcessor;
pub use update_queue::{UpdateQueueStats, UpdateSubmitter, WorkItemUpdateQueue};
pub use work_dispatcher::{GetWorkResponse, WorkDispatcher};
pub use work_item_update::{DiscardReason, UpdateOutcome, WorkItemUpdate};
