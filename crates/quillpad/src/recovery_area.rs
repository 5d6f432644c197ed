use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use crate::error::{EditorError, Result};
use crate::file_manager::write_atomic;

/// Named blobs kept apart from the main settings store, holding crash
/// recovery data.
#[async_trait]
pub trait RecoveryArea: Send + Sync {
    /// `Ok(None)` when the entry does not exist.
    async fn read(&self, name: &str) -> Result<Option<String>>;

    async fn write(&self, name: &str, contents: &str) -> Result<()>;

    /// Removing a missing entry is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryRecoveryArea {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryRecoveryArea {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecoveryArea for MemoryRecoveryArea {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock().get(name).cloned())
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        self.lock().insert(name.to_string(), contents.to_string());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.lock().remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }
}

/// One file per entry inside a directory.
#[derive(Debug, Clone)]
pub struct DirRecoveryArea {
    dir: PathBuf,
}

impl DirRecoveryArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl RecoveryArea for DirRecoveryArea {
    async fn read(&self, name: &str) -> Result<Option<String>> {
        let path = self.entry_path(name);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EditorError::from_read(path, e)),
        }
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        let write_error = |path: &Path, source| EditorError::Write {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(self.dir.as_path(), e))?;
        let path = self.entry_path(name);
        write_atomic(&path, contents)
            .await
            .map_err(|e| write_error(path.as_path(), e))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.entry_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(EditorError::Write { path, source }),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(EditorError::from_read(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EditorError::from_read(&self.dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dir_area_round_trip() {
        let dir = TempDir::new().unwrap();
        let area = DirRecoveryArea::new(dir.path().join("recovery"));

        assert_eq!(area.list().await.unwrap(), Vec::<String>::new());
        assert_eq!(area.read("a.txt").await.unwrap(), None);

        area.write("a.txt", "alpha").await.unwrap();
        area.write("b.txt", "beta").await.unwrap();
        assert_eq!(area.read("a.txt").await.unwrap().as_deref(), Some("alpha"));
        assert_eq!(area.list().await.unwrap(), vec!["a.txt", "b.txt"]);

        area.remove("a.txt").await.unwrap();
        area.remove("a.txt").await.unwrap();
        assert_eq!(area.list().await.unwrap(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_dir_area_reports_unreadable_entry() {
        let dir = TempDir::new().unwrap();
        let area = DirRecoveryArea::new(dir.path());
        std::fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0xfd]).unwrap();

        assert!(matches!(
            area.read("bad.txt").await,
            Err(EditorError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_area_round_trip() {
        let area = MemoryRecoveryArea::new();
        area.write("x", "1").await.unwrap();
        assert_eq!(area.read("x").await.unwrap().as_deref(), Some("1"));
        area.remove("x").await.unwrap();
        assert!(area.list().await.unwrap().is_empty());
    }
}
