//! Saves and restores the set of open tabs through the settings port.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::settings::{SettingsBatch, SettingsStore};

pub const SESSION_PREFIX: &str = "Session/";
pub const KEY_CURRENT_TAB: &str = "Session/currentTabIndex";
pub const KEY_RESTORE_SESSION: &str = "Session/restoreSession";
pub const KEY_TABS: &str = "Session/tabs";
pub const AUTOSAVE_PREFIX: &str = "AutoSave/";
pub const KEY_RECENT_FILES: &str = "Recent/files";

/// One tab as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    /// `None` when the text was left out because it matches the file.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_modified: bool,
    #[serde(default)]
    pub cursor_position: usize,
    #[serde(default)]
    pub is_untitled: bool,
    #[serde(default)]
    pub untitled_name: Option<String>,
}

/// The open tabs, in order, and which one is active.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub tabs: Vec<TabRecord>,
    pub current_tab_index: usize,
    pub restore_session: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            tabs: Vec::new(),
            current_tab_index: 0,
            restore_session: true,
        }
    }
}

impl SessionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

pub fn autosave_key(tab_id: &str) -> String {
    format!("{}{}", AUTOSAVE_PREFIX, tab_id)
}

pub struct SessionStore {
    settings: Arc<dyn SettingsStore>,
    max_recent_files: usize,
}

impl SessionStore {
    pub fn new(settings: Arc<dyn SettingsStore>, max_recent_files: usize) -> Self {
        Self {
            settings,
            max_recent_files,
        }
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Replaces the stored session in one commit. Readers see either the
    /// previous session or this one.
    pub async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut batch = SettingsBatch::new();
        batch.clear_prefix(SESSION_PREFIX);
        batch.set(KEY_CURRENT_TAB, &snapshot.current_tab_index)?;
        batch.set(KEY_RESTORE_SESSION, &snapshot.restore_session)?;
        batch.set(KEY_TABS, &snapshot.tabs)?;
        self.settings.commit(batch).await?;

        log::info!(
            "Session saved ({} tabs, active {})",
            snapshot.tabs.len(),
            snapshot.current_tab_index
        );
        Ok(())
    }

    /// The stored session, or an empty one when nothing was saved.
    pub async fn load(&self) -> Result<SessionSnapshot> {
        let mut snapshot = SessionSnapshot::default();

        if let Some(value) = self.settings.get(KEY_TABS).await? {
            snapshot.tabs = serde_json::from_value(value)?;
        }
        if let Some(value) = self.settings.get(KEY_CURRENT_TAB).await? {
            snapshot.current_tab_index = serde_json::from_value(value)?;
        }
        if let Some(value) = self.settings.get(KEY_RESTORE_SESSION).await? {
            snapshot.restore_session = serde_json::from_value(value)?;
        }

        log::debug!("Session loaded ({} tabs)", snapshot.tabs.len());
        Ok(snapshot)
    }

    pub async fn autosaved(&self, tab_id: &str) -> Result<Option<String>> {
        match self.settings.get(&autosave_key(tab_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Most recent first.
    pub async fn recent_files(&self) -> Result<Vec<PathBuf>> {
        match self.settings.get(KEY_RECENT_FILES).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn add_recent_file(&self, path: &Path) -> Result<()> {
        let mut files = self.recent_files().await?;
        files.retain(|existing| existing != path);
        files.insert(0, path.to_path_buf());
        files.truncate(self.max_recent_files);

        let mut batch = SettingsBatch::new();
        batch.set(KEY_RECENT_FILES, &files)?;
        self.settings.commit(batch).await
    }

    pub async fn clear_recent_files(&self) -> Result<()> {
        let mut batch = SettingsBatch::new();
        batch.remove(KEY_RECENT_FILES);
        self.settings.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{JsonFileSettings, MemorySettings};
    use serde_json::json;
    use tempfile::TempDir;

    fn untitled(content: &str, name: &str) -> TabRecord {
        TabRecord {
            file_path: None,
            content: Some(content.to_string()),
            is_modified: true,
            cursor_position: content.len(),
            is_untitled: true,
            untitled_name: Some(name.to_string()),
        }
    }

    fn saved(path: &str) -> TabRecord {
        TabRecord {
            file_path: Some(PathBuf::from(path)),
            content: Some("int main() {}".to_string()),
            is_modified: false,
            cursor_position: 4,
            is_untitled: false,
            untitled_name: None,
        }
    }

    #[tokio::test]
    async fn test_empty_store_loads_empty_session() {
        let store = SessionStore::new(Arc::new(MemorySettings::new()), 10);
        let snapshot = store.load().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.restore_session);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let settings = JsonFileSettings::open(dir.path().join("settings.json"))
            .await
            .unwrap();
        let store = SessionStore::new(Arc::new(settings), 10);

        let snapshot = SessionSnapshot {
            tabs: vec![
                saved("/tmp/a.cpp"),
                untitled("hello", "Untitled"),
                untitled("", "Untitled 2"),
            ],
            current_tab_index: 1,
            restore_session: true,
        };
        store.save(&snapshot).await.unwrap();

        let reopened = JsonFileSettings::open(dir.path().join("settings.json"))
            .await
            .unwrap();
        let loaded = SessionStore::new(Arc::new(reopened), 10)
            .load()
            .await
            .unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_session_keys() {
        let settings = Arc::new(MemorySettings::new());
        let mut batch = SettingsBatch::new();
        batch.set("Session/obsolete", &true).unwrap();
        settings.commit(batch).await.unwrap();

        let store = SessionStore::new(settings.clone(), 10);
        store.save(&SessionSnapshot::default()).await.unwrap();

        assert_eq!(settings.get("Session/obsolete").await.unwrap(), None);
        assert_eq!(settings.get(KEY_TABS).await.unwrap(), Some(json!([])));
    }

    #[tokio::test]
    async fn test_tab_record_uses_camel_case_keys() {
        let value = serde_json::to_value(untitled("hi", "Untitled")).unwrap();
        assert_eq!(value["isUntitled"], json!(true));
        assert_eq!(value["cursorPosition"], json!(2));
        assert_eq!(value["untitledName"], json!("Untitled"));
        assert_eq!(value["filePath"], json!(null));
    }

    #[tokio::test]
    async fn test_recent_files_are_deduplicated_and_capped() {
        let store = SessionStore::new(Arc::new(MemorySettings::new()), 3);
        for name in ["a", "b", "c", "a", "d"] {
            store
                .add_recent_file(&PathBuf::from(format!("/tmp/{}.txt", name)))
                .await
                .unwrap();
        }

        let recent = store.recent_files().await.unwrap();
        assert_eq!(
            recent,
            vec![
                PathBuf::from("/tmp/d.txt"),
                PathBuf::from("/tmp/a.txt"),
                PathBuf::from("/tmp/c.txt"),
            ]
        );

        store.clear_recent_files().await.unwrap();
        assert!(store.recent_files().await.unwrap().is_empty());
    }
}
