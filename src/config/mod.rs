//! # Orchestrator Configuration
//!
//! Every section is fully defaulted, so an empty file (or no file at all) yields a
//! working configuration. Values are layered by [`ConfigManager`]: TOML file, then
//! environment-specific TOML file, then `ORCHESTRATOR__SECTION__KEY` variables.
//!
//! ```rust,no_run
//! use granule_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let page_size = manager.config().discovery.max_page_size;
//! # let _ = page_size;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system;
use crate::error::{OrchestratorError, OrchestratorResult};

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub database: DatabaseConfig,
    pub discovery: DiscoveryConfig,
    pub work_items: WorkItemConfig,
    pub jobs: JobConfig,
    pub update_queue: UpdateQueueConfig,
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/granule_orchestrator_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Granule discovery paging
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// System maximum granules returned by one discovery page
    pub max_page_size: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_page_size: system::DEFAULT_DISCOVERY_MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkItemConfig {
    /// Retries allowed per work item before a failure is permanent
    pub retry_limit: i32,
    /// Rows per bulk insert when fanning out
    pub insert_batch_size: usize,
    /// Maximum item links per aggregated catalog page
    pub aggregation_page_size: usize,
    /// Dispatch attempts before answering "no work"
    pub get_work_max_tries: u32,
    pub get_work_retry_delay_ms: u64,
    /// RUNNING items older than this are failed by the reaper
    pub reaper_timeout_seconds: i64,
    pub reaper_interval_seconds: u64,
}

impl Default for WorkItemConfig {
    fn default() -> Self {
        Self {
            retry_limit: system::DEFAULT_WORK_ITEM_RETRY_LIMIT,
            insert_batch_size: system::DEFAULT_INSERT_BATCH_SIZE,
            aggregation_page_size: system::DEFAULT_AGGREGATION_PAGE_SIZE,
            get_work_max_tries: system::DEFAULT_GET_WORK_MAX_TRIES,
            get_work_retry_delay_ms: system::DEFAULT_GET_WORK_RETRY_DELAY_MS,
            reaper_timeout_seconds: system::DEFAULT_REAPER_TIMEOUT_SECONDS,
            reaper_interval_seconds: system::DEFAULT_REAPER_INTERVAL_SECONDS,
        }
    }
}

impl WorkItemConfig {
    pub fn get_work_retry_delay(&self) -> Duration {
        Duration::from_millis(self.get_work_retry_delay_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct JobConfig {
    /// Error budget: permanent failures tolerated before a job is failed
    pub max_errors_for_job: i64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_errors_for_job: system::DEFAULT_MAX_ERRORS_FOR_JOB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateQueueConfig {
    pub capacity: usize,
    pub max_delivery_attempts: u32,
    pub redelivery_delay_ms: u64,
}

impl Default for UpdateQueueConfig {
    fn default() -> Self {
        Self {
            capacity: system::DEFAULT_UPDATE_QUEUE_CAPACITY,
            max_delivery_attempts: system::DEFAULT_MAX_DELIVERY_ATTEMPTS,
            redelivery_delay_ms: system::DEFAULT_REDELIVERY_DELAY_MS,
        }
    }
}

impl UpdateQueueConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Prefix of every work item output namespace
    pub root: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: "file:///tmp/granule-orchestrator/artifacts".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.database.max_connections == 0 {
            return Err(invalid_value("database.max_connections", "must be greater than 0"));
        }
        if self.discovery.max_page_size <= 0 {
            return Err(invalid_value("discovery.max_page_size", "must be greater than 0"));
        }
        if self.work_items.retry_limit < 0 {
            return Err(invalid_value("work_items.retry_limit", "must not be negative"));
        }
        if self.work_items.insert_batch_size == 0 {
            return Err(invalid_value("work_items.insert_batch_size", "must be greater than 0"));
        }
        if self.work_items.aggregation_page_size == 0 {
            return Err(invalid_value(
                "work_items.aggregation_page_size",
                "must be greater than 0",
            ));
        }
        if self.work_items.get_work_max_tries == 0 {
            return Err(invalid_value("work_items.get_work_max_tries", "must be greater than 0"));
        }
        if self.work_items.reaper_timeout_seconds <= 0 {
            return Err(invalid_value(
                "work_items.reaper_timeout_seconds",
                "must be greater than 0",
            ));
        }
        if self.jobs.max_errors_for_job < 0 {
            return Err(invalid_value("jobs.max_errors_for_job", "must not be negative"));
        }
        if self.update_queue.capacity == 0 {
            return Err(invalid_value("update_queue.capacity", "must be greater than 0"));
        }
        if self.update_queue.max_delivery_attempts == 0 {
            return Err(invalid_value(
                "update_queue.max_delivery_attempts",
                "must be greater than 0",
            ));
        }
        if self.artifacts.root.trim().is_empty() {
            return Err(invalid_value("artifacts.root", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid_value(field: &str, reason: &str) -> OrchestratorError {
    OrchestratorError::ConfigurationError(format!("Invalid value for {field}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.discovery.max_page_size, 2000);
        assert_eq!(config.work_items.retry_limit, 1);
        assert_eq!(config.work_items.insert_batch_size, 100);
        assert_eq!(config.work_items.aggregation_page_size, 10_000);
        assert_eq!(config.work_items.get_work_retry_delay(), Duration::from_secs(120));
        assert_eq!(config.jobs.max_errors_for_job, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = OrchestratorConfig::default();
        config.discovery.max_page_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("discovery.max_page_size"));

        let mut config = OrchestratorConfig::default();
        config.work_items.aggregation_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_deserialize() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"work_items": {"retry_limit": 3}}"#).unwrap();
        assert_eq!(config.work_items.retry_limit, 3);
        assert_eq!(config.work_items.insert_batch_size, 100);
        assert_eq!(config.jobs, JobConfig::default());
    }
}
