//! Runtime settings and the persisted key/value configuration collaborator.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bridge::DEFAULT_BACKLOG_WARNING;
use crate::error::{NavigatorError, Result};

/// Config key the navigator persists the last visited directory under.
pub const LAST_DIRECTORY_KEY: &str = "lastDirectoryAt";

const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 500;
const DEFAULT_FUZZY_MIN_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    /// Undelivered events a bridge subscriber may queue before a warning.
    pub backlog_warning: usize,
    /// How long a finished listing waits for its file events to be ingested
    /// before deciding whether the directory is empty.
    pub settle_timeout_ms: u64,
    /// Fuzzy queries shorter than this are not sent to the backend.
    pub fuzzy_min_length: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            backlog_warning: DEFAULT_BACKLOG_WARNING,
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
            fuzzy_min_length: DEFAULT_FUZZY_MIN_LENGTH,
        }
    }
}

impl NavigatorConfig {
    /// Defaults overridden by `NAVIGATOR_BACKLOG_WARNING` and
    /// `NAVIGATOR_SETTLE_TIMEOUT_MS` when set to positive integers.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backlog_warning: read_limit("NAVIGATOR_BACKLOG_WARNING", defaults.backlog_warning),
            settle_timeout_ms: read_limit(
                "NAVIGATOR_SETTLE_TIMEOUT_MS",
                defaults.settle_timeout_ms as usize,
            ) as u64,
            ..defaults
        }
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Persisted settings store owned by the host application.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;
    async fn update(&self, key: &str, value: Value) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    data: parking_lot::RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings kept in a single JSON object on disk.
#[derive(Debug)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    write_lane: tokio::sync::Mutex<()>,
}

impl JsonFileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lane: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => {
                return Err(NavigatorError::Config(format!(
                    "failed to read config file {}: {error}",
                    self.path.display()
                )))
            }
        };
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Err(NavigatorError::Config(format!(
                "config file {} is not a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load().await?.get(key).cloned())
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        let _lane = self.write_lane.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                NavigatorError::Config(format!(
                    "failed to create config directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
        let serialized = serde_json::to_vec_pretty(&Value::Object(map))?;
        tokio::fs::write(&self.path, serialized)
            .await
            .map_err(|error| {
                NavigatorError::Config(format!(
                    "failed to write config file {}: {error}",
                    self.path.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_reads_back_updates() {
        let store = MemoryConfigStore::new();
        assert!(store.read(LAST_DIRECTORY_KEY).await.expect("read").is_none());
        store
            .update(LAST_DIRECTORY_KEY, json!("C:\\Users"))
            .await
            .expect("update");
        assert_eq!(
            store.read(LAST_DIRECTORY_KEY).await.expect("read"),
            Some(json!("C:\\Users"))
        );
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let store = JsonFileConfigStore::new(path.clone());
        store.update("theme", json!("dark")).await.expect("update");
        store
            .update(LAST_DIRECTORY_KEY, json!("/home"))
            .await
            .expect("update");

        let reopened = JsonFileConfigStore::new(path);
        assert_eq!(reopened.read("theme").await.expect("read"), Some(json!("dark")));
        assert_eq!(
            reopened.read(LAST_DIRECTORY_KEY).await.expect("read"),
            Some(json!("/home"))
        );
        assert!(reopened.read("missing").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_non_object_documents() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"[1, 2]").expect("write");

        let store = JsonFileConfigStore::new(path);
        assert!(matches!(
            store.read("anything").await,
            Err(NavigatorError::Config(_))
        ));
    }

    #[test]
    fn defaults_match_backend_expectations() {
        let config = NavigatorConfig::default();
        assert_eq!(config.fuzzy_min_length, 4);
        assert_eq!(config.settle_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: NavigatorConfig =
            serde_json::from_value(json!({ "settle_timeout_ms": 50 })).expect("deserialize");
        assert_eq!(config.settle_timeout_ms, 50);
        assert_eq!(config.backlog_warning, DEFAULT_BACKLOG_WARNING);
    }
}
