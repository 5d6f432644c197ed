use std::path::PathBuf;
use thiserror::Error;

/// Failures the session core reports back to the shell.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document {index} has unsaved changes")]
    UnsavedChanges { index: usize },

    #[error("tab index {index} out of range (0..{count})")]
    Index { index: usize, count: usize },

    #[error("recovery content for tab {tab} is unreadable: {reason}")]
    RecoveryCorrupt { tab: usize, reason: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EditorError {
    /// Maps an I/O failure on `path` to `NotFound` or `Read`.
    pub fn from_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => EditorError::NotFound { path },
            _ => EditorError::Read { path, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, EditorError>;
