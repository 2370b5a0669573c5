//! # Object Store
//!
//! JSON get/put and key listing over the artifact namespace. Locations are full
//! URLs (`s3://...`, `file:///...`) or bare filesystem paths; each work item writes
//! only below its own output prefix, so writers never contend on a key.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

const FILE_SCHEME: &str = "file://";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_json(&self, location: &str) -> OrchestratorResult<serde_json::Value>;

    async fn put_json(&self, location: &str, value: &serde_json::Value) -> OrchestratorResult<()>;

    /// Every key under `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> OrchestratorResult<Vec<String>>;

    async fn exists(&self, location: &str) -> OrchestratorResult<bool>;
}

/// Read and deserialize a JSON document
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    location: &str,
) -> OrchestratorResult<T> {
    let value = store.get_json(location).await?;
    serde_json::from_value(value).map_err(|e| OrchestratorError::object_store(location, e))
}

/// Serialize and write a JSON document
pub async fn write_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    location: &str,
    document: &T,
) -> OrchestratorResult<()> {
    let value =
        serde_json::to_value(document).map_err(|e| OrchestratorError::object_store(location, e))?;
    store.put_json(location, &value).await
}

/// Process-local store keyed by full location
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, serde_json::Value>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_json(&self, location: &str) -> OrchestratorResult<serde_json::Value> {
        self.objects
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::object_store(location, "object not found"))
    }

    async fn put_json(&self, location: &str, value: &serde_json::Value) -> OrchestratorResult<()> {
        self.objects.insert(location.to_string(), value.clone());
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> OrchestratorResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, location: &str) -> OrchestratorResult<bool> {
        Ok(self.objects.contains_key(location))
    }
}

/// Store backed by a local or mounted filesystem
#[derive(Debug, Clone, Default)]
pub struct FileSystemObjectStore;

impl FileSystemObjectStore {
    pub fn new() -> Self {
        Self
    }

    fn path_for(location: &str) -> OrchestratorResult<PathBuf> {
        if let Some(path) = location.strip_prefix(FILE_SCHEME) {
            return Ok(PathBuf::from(path));
        }
        if location.contains("://") {
            return Err(OrchestratorError::object_store(
                location,
                "unsupported scheme for filesystem store",
            ));
        }
        Ok(PathBuf::from(location))
    }

    fn location_for(prefix: &str, path: &Path) -> String {
        let path = path.to_string_lossy();
        if prefix.starts_with(FILE_SCHEME) {
            format!("{FILE_SCHEME}{path}")
        } else {
            path.into_owned()
        }
    }
}

#[async_trait]
impl ObjectStore for FileSystemObjectStore {
    async fn get_json(&self, location: &str) -> OrchestratorResult<serde_json::Value> {
        let path = Self::path_for(location)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| OrchestratorError::object_store(location, e))?;
        serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::object_store(location, e))
    }

    async fn put_json(&self, location: &str, value: &serde_json::Value) -> OrchestratorResult<()> {
        let path = Self::path_for(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OrchestratorError::object_store(location, e))?;
        }
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| OrchestratorError::object_store(location, e))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| OrchestratorError::object_store(location, e))?;
        debug!(location = %location, "Wrote object");
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> OrchestratorResult<Vec<String>> {
        let root = Self::path_for(prefix)?;
        let mut keys = Vec::new();
        let mut pending = vec![root];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(OrchestratorError::object_store(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| OrchestratorError::object_store(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| OrchestratorError::object_store(prefix, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else {
                    keys.push(Self::location_for(prefix, &path));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, location: &str) -> OrchestratorResult<bool> {
        let path = Self::path_for(location)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| OrchestratorError::object_store(location, e))
    }
}
