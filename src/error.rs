//! Error types for the granule orchestrator.
//!
//! Recoverable conditions inside update ingestion (stale updates, retries, benign
//! races) are reported as [`crate::orchestration::UpdateOutcome`] values, not errors.
//! Everything here is either a store/IO failure or a caller mistake.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Object store error for {location}: {reason}")]
    ObjectStoreError { location: String, reason: String },
    #[error("Catalog error for {location}: {reason}")]
    CatalogError { location: String, reason: String },
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error("Work item {0} not found")]
    WorkItemNotFound(i64),
    #[error("Workflow step {step_index} not found for job {job_id}")]
    WorkflowStepNotFound { job_id: Uuid, step_index: i32 },
    #[error("Update queue closed")]
    QueueClosed,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn object_store(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::ObjectStoreError {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn catalog(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::CatalogError {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OrchestratorError::DatabaseError(format!("Migration failed: {err}"))
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::ConfigurationError(err.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for OrchestratorError {
    fn from(err: crate::state_machine::StateMachineError) -> Self {
        OrchestratorError::StateTransitionError(err.to_string())
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
