//! # Database Operations
//!
//! Transactional persistence for jobs, workflow steps and work items.
//!
//! ## Key Components
//!
//! - [`store`] - the [`WorkItemStore`] / [`StoreTransaction`] seam used by orchestration
//! - [`postgres`] - row-locking Postgres backend
//! - [`in_memory`] - serialising in-process backend for tests and embedded use
//! - [`migrations`] - embedded schema migrations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use granule_orchestrator::config::DatabaseConfig;
//! use granule_orchestrator::database::{migrations, PgWorkItemStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgWorkItemStore::connect(&DatabaseConfig::default()).await?;
//! migrations::run(store.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod in_memory;
pub mod migrations;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryWorkItemStore;
pub use postgres::PgWorkItemStore;
pub use store::{StoreTransaction, WorkItemStore};
