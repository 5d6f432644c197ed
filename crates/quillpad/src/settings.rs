//! Key-value settings storage behind a port the session core is built
//! against. Values are JSON; keys use `Group/name` paths.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EditorError, Result};
use crate::file_manager::write_atomic;

/// A set of changes applied all at once: prefix removals first, then
/// single-key removals, then writes.
#[derive(Debug, Clone, Default)]
pub struct SettingsBatch {
    cleared_prefixes: Vec<String>,
    removed: Vec<String>,
    values: BTreeMap<String, Value>,
}

impl SettingsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.cleared_prefixes.push(prefix.into());
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.removed.push(key.into());
        self
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<&mut Self> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.cleared_prefixes.is_empty() && self.removed.is_empty() && self.values.is_empty()
    }

    fn apply(self, map: &mut BTreeMap<String, Value>) {
        for prefix in &self.cleared_prefixes {
            map.retain(|key, _| !key.starts_with(prefix.as_str()));
        }
        for key in &self.removed {
            map.remove(key);
        }
        map.extend(self.values);
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Applies the whole batch or nothing.
    async fn commit(&self, batch: SettingsBatch) -> Result<()>;
}

/// In-process store, used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: SettingsBatch) -> Result<()> {
        let mut values = self.lock();
        let mut next = values.clone();
        batch.apply(&mut next);
        *values = next;
        Ok(())
    }
}

/// Settings persisted as one JSON object in a file. Every commit rewrites
/// the file through a temp file and rename.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: tokio::sync::Mutex<BTreeMap<String, Value>>,
}

impl JsonFileSettings {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = Self::read_values(&path).await?;
        log::info!("Settings loaded from {} ({} keys)", path.display(), values.len());
        Ok(Self {
            path,
            values: tokio::sync::Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_values(path: &Path) -> Result<BTreeMap<String, Value>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(EditorError::from_read(path, e)),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(values) => Ok(values),
            Err(e) => {
                log::error!("Failed to parse settings file {}: {}", path.display(), e);
                let backup_path = path.with_extension("bak");
                if let Err(e) = tokio::fs::copy(path, &backup_path).await {
                    log::warn!("Failed to backup broken settings: {}", e);
                } else {
                    log::info!("Backed up broken settings to: {}", backup_path.display());
                }
                Ok(BTreeMap::new())
            }
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .values
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: SettingsBatch) -> Result<()> {
        let mut values = self.values.lock().await;
        let mut next = values.clone();
        batch.apply(&mut next);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| EditorError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let json = serde_json::to_string_pretty(&next)?;
        write_atomic(&self.path, &json)
            .await
            .map_err(|source| EditorError::Write {
                path: self.path.clone(),
                source,
            })?;

        *values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_batch_applies_removals_before_writes() {
        let store = MemorySettings::new();
        let mut batch = SettingsBatch::new();
        batch.set("Session/a", &1).unwrap();
        batch.set("Session/b", &2).unwrap();
        batch.set("Other/c", &3).unwrap();
        store.commit(batch).await.unwrap();

        let mut batch = SettingsBatch::new();
        batch.clear_prefix("Session/");
        batch.set("Session/a", &10).unwrap();
        store.commit(batch).await.unwrap();

        assert_eq!(store.get("Session/a").await.unwrap(), Some(json!(10)));
        assert_eq!(store.get("Session/b").await.unwrap(), None);
        assert_eq!(store.get("Other/c").await.unwrap(), Some(json!(3)));
        assert_eq!(
            store.keys_with_prefix("Session/").await.unwrap(),
            vec!["Session/a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_json_file_settings_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileSettings::open(&path).await.unwrap();
        let mut batch = SettingsBatch::new();
        batch.set("Recent/files", &vec!["/tmp/a.txt"]).unwrap();
        store.commit(batch).await.unwrap();

        let reopened = JsonFileSettings::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("Recent/files").await.unwrap(),
            Some(json!(["/tmp/a.txt"]))
        );
    }

    #[tokio::test]
    async fn test_corrupt_settings_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ broken").unwrap();

        let store = JsonFileSettings::open(&path).await.unwrap();
        assert!(store.keys_with_prefix("").await.unwrap().is_empty());
        assert!(dir.path().join("settings.bak").exists());
    }
}
