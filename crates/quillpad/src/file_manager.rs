use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{mb_to_bytes, EditorConfig};
use crate::error::{EditorError, Result};

/// Disk access for documents. Everything the session core knows about
/// real files goes through here.
#[derive(Debug, Clone)]
pub struct FileManager {
    large_file_threshold: u64,
    create_backup: bool,
}

impl FileManager {
    pub fn new() -> Self {
        Self::from_config(&EditorConfig::default())
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            large_file_threshold: mb_to_bytes(config.large_file_warning_mb),
            create_backup: config.create_backup,
        }
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    pub async fn read_document(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(EditorError::NotFound {
                path: path.to_path_buf(),
            });
        }

        if !path.is_file() {
            return Err(EditorError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path is not a regular file",
                ),
            });
        }

        match fs::metadata(path).await {
            Ok(metadata) if metadata.len() > self.large_file_threshold => {
                log::warn!(
                    "Large file detected ({} bytes): {}",
                    metadata.len(),
                    path.display()
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to get file metadata: {}", e),
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| EditorError::from_read(path, e))?;

        if content.contains('\0') {
            return Err(EditorError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file looks binary",
                ),
            });
        }

        log::info!("Successfully opened file: {}", path.display());
        Ok(content)
    }

    pub async fn write_document(&self, path: &Path, content: &str) -> Result<()> {
        let write_error = |source| EditorError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(write_error)?;
                log::info!("Created directory: {}", parent.display());
            }
        }

        if self.create_backup && path.exists() {
            if let Ok(metadata) = fs::metadata(path).await {
                if metadata.len() > 0 {
                    let backup_path = path.with_extension("bak");
                    if let Err(e) = fs::copy(path, &backup_path).await {
                        log::warn!("Failed to create backup: {}", e);
                    } else {
                        log::info!("Created backup: {}", backup_path.display());
                    }
                }
            }
        }

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;

        loop {
            match write_atomic(path, content).await {
                Ok(()) => {
                    log::info!("Successfully saved file: {}", path.display());
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(write_error(e));
                    }
                    tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempts as u64))
                        .await;
                    log::warn!(
                        "Save attempt {} failed for {}, retrying...",
                        attempts,
                        path.display()
                    );
                }
            }
        }
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `contents` next to `path` and renames it into place, so readers
/// see either the old file or the complete new one.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = temp_path(path);
    fs::write(&tmp, contents.as_bytes()).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_read_document() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "Hello World\nTest content").unwrap();

        let fm = FileManager::new();
        let content = fm.read_document(temp_file.path()).await.unwrap();
        assert!(content.starts_with("Hello World"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new();
        let error = fm
            .read_document(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(error, EditorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_read_error() {
        let dir = TempDir::new().unwrap();
        let fm = FileManager::new();
        let error = fm.read_document(dir.path()).await.unwrap_err();
        assert!(matches!(error, EditorError::Read { .. }));
    }

    #[tokio::test]
    async fn test_binary_content_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"abc\0def").unwrap();

        let fm = FileManager::new();
        let error = fm.read_document(temp_file.path()).await.unwrap_err();
        assert!(error.to_string().contains("binary"));
    }

    #[tokio::test]
    async fn test_write_creates_parent_and_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("a.txt");
        let fm = FileManager::new();

        fm.write_document(&path, "first").await.unwrap();
        fm.write_document(&path, "second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(
            std::fs::read_to_string(path.with_extension("bak")).unwrap(),
            "first"
        );
        assert!(!temp_path(&path).exists());
    }
}
