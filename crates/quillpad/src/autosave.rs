use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AutoSaveConfig;
use crate::document::DocumentState;
use crate::error::Result;
use crate::session_store::{autosave_key, AUTOSAVE_PREFIX};
use crate::settings::{SettingsBatch, SettingsStore};

#[derive(Debug, Clone, PartialEq)]
pub struct AutoSaveReport {
    pub written: usize,
    pub removed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Stable key for a tab's auto-save entry: its path once saved,
/// otherwise its position in the tab list.
pub fn tab_id(document: &DocumentState, position: usize) -> String {
    match document.path() {
        Some(path) => path.display().to_string(),
        None => format!("untitled-{}", position),
    }
}

/// Periodically copies the text of every modified tab into the settings
/// store. It never changes a document's modified flag.
pub struct AutoSaveCoordinator {
    settings: Arc<dyn SettingsStore>,
    enabled: bool,
    interval: Duration,
    last_report: Option<AutoSaveReport>,
}

impl AutoSaveCoordinator {
    pub fn new(settings: Arc<dyn SettingsStore>, config: &AutoSaveConfig) -> Self {
        Self {
            settings,
            enabled: config.enabled,
            interval: config.interval(),
            last_report: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_report(&self) -> Option<&AutoSaveReport> {
        self.last_report.as_ref()
    }

    /// Writes every modified document and drops entries for tabs that are
    /// no longer modified or no longer open, in a single commit.
    pub async fn tick(&mut self, documents: &[DocumentState]) -> Result<AutoSaveReport> {
        let mut batch = SettingsBatch::new();
        let mut live = BTreeSet::new();

        for (position, document) in documents.iter().enumerate() {
            if !document.is_modified() {
                continue;
            }
            let key = autosave_key(&tab_id(document, position));
            batch.set(key.clone(), &document.content())?;
            live.insert(key);
        }

        let mut removed = 0;
        for key in self.settings.keys_with_prefix(AUTOSAVE_PREFIX).await? {
            if !live.contains(&key) {
                batch.remove(key);
                removed += 1;
            }
        }

        let report = AutoSaveReport {
            written: live.len(),
            removed,
            timestamp: Utc::now(),
        };

        if !batch.is_empty() {
            self.settings.commit(batch).await?;
        }
        log::debug!(
            "Auto-save tick: {} written, {} removed",
            report.written,
            report.removed
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }
}
