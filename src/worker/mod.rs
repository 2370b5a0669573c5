//! # Worker Results
//!
//! Shapes produced by the process that runs a service for one work item, and the
//! helpers it uses to turn a finished run into a [`WorkItemUpdate`]: the catalogs
//! the service wrote into the item's output directory, and a readable error message
//! when it failed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::catalog::{read_json, ObjectStore};
use crate::constants::{artifacts, messages};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestration::WorkItemUpdate;

/// Result of running a service for one work item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    #[serde(default)]
    pub batch_catalogs: Vec<String>,
    #[serde(default)]
    pub total_granules_size: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub hits: Option<i32>,
    #[serde(default, rename = "scrollID")]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl ServiceResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The update reported to the orchestrator for `work_item_id`
    pub fn into_update(self, work_item_id: i64) -> WorkItemUpdate {
        let mut update = match self.error {
            Some(error) => WorkItemUpdate::failed(work_item_id, error),
            None => WorkItemUpdate::succeeded(work_item_id, self.batch_catalogs),
        };
        update.hits = self.hits;
        update.scroll_id = self.scroll_id;
        update.total_granules_size = self.total_granules_size;
        update.duration_ms = self.duration_ms;
        update
    }
}

#[derive(Debug, Deserialize)]
struct ErrorFile {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Catalogs a service wrote directly into `output_dir`, sorted by location
pub async fn collect_output_catalogs(
    store: &dyn ObjectStore,
    output_dir: &str,
) -> OrchestratorResult<Vec<String>> {
    let pattern = Regex::new(artifacts::CATALOG_FILE_PATTERN)
        .map_err(|e| OrchestratorError::Internal(format!("Invalid catalog pattern: {e}")))?;
    let catalogs: Vec<String> = store
        .list_keys(output_dir)
        .await?
        .into_iter()
        .filter(|key| {
            key.strip_prefix(output_dir)
                .map(|name| pattern.is_match(name.trim_start_matches('/')))
                .unwrap_or(false)
        })
        .collect();
    debug!(output_dir = %output_dir, count = catalogs.len(), "Collected output catalogs");
    Ok(catalogs)
}

/// Message for a failed run: `error.json` in the output directory wins, then the
/// first ERROR-level JSON entry in the service log.
pub async fn extract_error_message(store: &dyn ObjectStore, log: &str, output_dir: &str) -> String {
    let error_file = format!(
        "{}/{}",
        output_dir.trim_end_matches('/'),
        artifacts::ERROR_FILE
    );
    match store.exists(&error_file).await {
        Ok(true) => {
            return match read_json::<ErrorFile>(store, &error_file).await {
                Ok(entry) => entry.error,
                Err(e) => {
                    error!(error_file = %error_file, error = %e, "Could not read error file");
                    e.to_string()
                }
            };
        }
        Ok(false) => {}
        Err(e) => {
            error!(error_file = %error_file, error = %e, "Could not check for error file");
            return e.to_string();
        }
    }

    first_error_log_message(log).unwrap_or_else(|| messages::UNKNOWN_WORKER_ERROR.to_string())
}

fn first_error_log_message(log: &str) -> Option<String> {
    let entries = Regex::new(r"(?s)\{.*?\}").ok()?;
    let message = entries
        .find_iter(log)
        .filter_map(|m| serde_json::from_str::<LogEntry>(m.as_str()).ok())
        .find(|entry| {
            entry
                .level
                .as_deref()
                .is_some_and(|level| level.eq_ignore_ascii_case("error"))
        })
        .and_then(|entry| entry.message);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{write_json, InMemoryObjectStore};
    use crate::state_machine::WorkItemStatus;
    use serde_json::json;

    const OUTPUT_DIR: &str = "mem://artifacts/job/7/outputs/";

    #[tokio::test]
    async fn test_collect_output_catalogs() {
        let store = InMemoryObjectStore::new();
        for name in ["catalog.json", "catalog0.json", "catalog12.json", "batch-catalogs.json", "item0.json"] {
            write_json(&store, &format!("{OUTPUT_DIR}{name}"), &json!({}))
                .await
                .unwrap();
        }
        write_json(&store, "mem://artifacts/job/8/outputs/catalog.json", &json!({}))
            .await
            .unwrap();

        let catalogs = collect_output_catalogs(&store, OUTPUT_DIR).await.unwrap();
        assert_eq!(
            catalogs,
            vec![
                format!("{OUTPUT_DIR}catalog.json"),
                format!("{OUTPUT_DIR}catalog0.json"),
                format!("{OUTPUT_DIR}catalog12.json"),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_file_wins() {
        let store = InMemoryObjectStore::new();
        write_json(&store, &format!("{OUTPUT_DIR}error.json"), &json!({"error": "No data in bbox"}))
            .await
            .unwrap();
        let log = r#"{"level":"error","message":"from the log"}"#;
        assert_eq!(extract_error_message(&store, log, OUTPUT_DIR).await, "No data in bbox");
    }

    #[tokio::test]
    async fn test_error_from_log() {
        let store = InMemoryObjectStore::new();
        let log = concat!(
            r#"{"level":"info","message":"starting"}"#,
            "\nplain text line\n",
            r#"{"level":"ERROR","message":"variable not found"}"#,
            r#"{"level":"error","message":"later"}"#,
        );
        assert_eq!(extract_error_message(&store, log, OUTPUT_DIR).await, "variable not found");
        assert_eq!(
            extract_error_message(&store, "nothing useful", OUTPUT_DIR).await,
            "Unknown error"
        );
    }

    #[test]
    fn test_first_error_log_message() {
        let log = r#"{"level":"warn","message":"slow"}{"level":"error","message":"bad band"}"#;
        assert_eq!(first_error_log_message(log).as_deref(), Some("bad band"));
        assert_eq!(first_error_log_message(r#"{"level":"info","message":"ok"}"#), None);
        assert_eq!(first_error_log_message(""), None);
    }

    #[test]
    fn test_response_into_update() {
        let response: ServiceResponse = serde_json::from_value(json!({
            "batchCatalogs": ["s3://b/catalog0.json"],
            "hits": 12,
            "scrollID": "abc",
            "totalGranulesSize": 1.5
        }))
        .unwrap();
        let update = response.into_update(3);
        assert_eq!(update.status, WorkItemStatus::Successful);
        assert_eq!(update.results, vec!["s3://b/catalog0.json".to_string()]);
        assert_eq!(update.hits, Some(12));
        assert_eq!(update.scroll_id.as_deref(), Some("abc"));

        let update = ServiceResponse::failed("boom").into_update(3);
        assert_eq!(update.status, WorkItemStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some("boom"));
        assert!(update.results.is_empty());
    }
}
