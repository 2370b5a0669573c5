#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Granule Orchestrator
//!
//! Work-item lifecycle and job-progression engine for multi-step, granule-based
//! data processing.
//!
//! ## Overview
//!
//! A job is a workflow of steps, each executed by one service. Every step is broken
//! into work items, usually one per granule or one per aggregated batch. Workers
//! poll for items, run them and report back; the orchestrator decides what work to
//! create next and moves the job toward a terminal status.
//!
//! ## Module Organization
//!
//! - [`models`] - jobs, workflow steps, work items, job errors and job links
//! - [`state_machine`] - job and work item status transitions
//! - [`database`] - transactional store seam with Postgres and in-memory backends
//! - [`catalog`] - STAC catalogs and the object store they live in
//! - [`orchestration`] - dispatch, update processing, fan-out, finalization, reaping
//! - [`worker`] - result shapes produced by service runners
//! - [`config`] - layered TOML and environment configuration
//! - [`logging`] - structured tracing setup
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use granule_orchestrator::catalog::InMemoryObjectStore;
//! use granule_orchestrator::config::OrchestratorConfig;
//! use granule_orchestrator::database::InMemoryWorkItemStore;
//! use granule_orchestrator::orchestration::{GetWorkResponse, OrchestrationCore};
//!
//! # tokio_test::block_on(async {
//! let core = OrchestrationCore::with_components(
//!     OrchestratorConfig::default(),
//!     Arc::new(InMemoryWorkItemStore::new()),
//!     Arc::new(InMemoryObjectStore::new()),
//! );
//!
//! // nothing has been queued for this service yet
//! let response = core.dispatcher.get_work("subsetter", Some("pod-1")).await.unwrap();
//! assert_eq!(response, GetWorkResponse::NoWork);
//! # });
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod worker;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use models::{Job, JobError, JobLink, WorkItem, WorkflowStep};
pub use orchestration::{
    GetWorkResponse, OrchestrationCore, UpdateOutcome, WorkDispatcher, WorkItemUpdate,
    WorkItemUpdateProcessor, WorkItemUpdateQueue,
};
pub use state_machine::{JobStatus, WorkItemStatus};
