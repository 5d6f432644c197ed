//! Crash recovery. A snapshot of every tab is rewritten on each auto-save
//! tick and consumed at the next startup.
//!
//! Layout inside the recovery area:
//! - `tab-<generation>-<index>.txt` holds one tab's text,
//! - `recovery.json` is the metadata record that points at them.
//!
//! Content files of a new generation are written before the metadata, and
//! the old generation is deleted after it, so the metadata never refers to
//! a half-written file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{EditorError, Result};
use crate::recovery_area::RecoveryArea;
use crate::session_store::{SessionSnapshot, TabRecord};

pub const METADATA_FILE: &str = "recovery.json";
const CONTENT_PREFIX: &str = "tab-";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryTab {
    #[serde(default)]
    file_path: Option<PathBuf>,
    #[serde(default)]
    is_modified: bool,
    #[serde(default)]
    cursor_position: usize,
    #[serde(default)]
    is_untitled: bool,
    #[serde(default)]
    untitled_name: Option<String>,
    content_file_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoveryRecord {
    timestamp: DateTime<Utc>,
    current_tab_index: usize,
    tabs: Vec<RecoveryTab>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Clean,
    PendingRecovery { timestamp: DateTime<Utc> },
}

/// What the user is asked about at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOffer {
    pub timestamp: DateTime<Utc>,
    pub tab_count: usize,
}

#[derive(Debug)]
pub enum RecoveryOutcome {
    NoSnapshot,
    /// The metadata could not be parsed and was thrown away.
    Discarded,
    Stale { timestamp: DateTime<Utc> },
    Declined,
    Recovered {
        tabs: Vec<TabRecord>,
        current_tab_index: usize,
        /// One `RecoveryCorrupt` per tab whose content was unreadable.
        skipped: Vec<EditorError>,
    },
}

pub struct CrashRecoveryManager {
    area: Arc<dyn RecoveryArea>,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
    generation: u64,
}

impl CrashRecoveryManager {
    pub fn new(area: Arc<dyn RecoveryArea>, max_age: chrono::Duration) -> Self {
        Self::with_clock(area, max_age, Arc::new(SystemClock))
    }

    pub fn with_clock(
        area: Arc<dyn RecoveryArea>,
        max_age: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            area,
            clock,
            max_age,
            generation: 0,
        }
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    async fn read_record(&self) -> Result<Option<RecoveryRecord>> {
        match self.area.read(METADATA_FILE).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn state(&self) -> Result<RecoveryState> {
        match self.read_record().await {
            Ok(Some(record)) => Ok(RecoveryState::PendingRecovery {
                timestamp: record.timestamp,
            }),
            Ok(None) => Ok(RecoveryState::Clean),
            Err(e @ (EditorError::Serialization(_) | EditorError::Read { .. })) => {
                log::warn!("Recovery metadata is unreadable: {}", e);
                Ok(RecoveryState::Clean)
            }
            Err(e) => Err(e),
        }
    }

    fn next_generation(&mut self) -> u64 {
        let now = self.clock.now().timestamp_millis().max(0) as u64;
        self.generation = now.max(self.generation + 1);
        self.generation
    }

    /// Replaces the recovery snapshot with `snapshot`.
    pub async fn write_snapshot(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        let generation = self.next_generation();
        let mut tabs = Vec::with_capacity(snapshot.tabs.len());

        for (index, tab) in snapshot.tabs.iter().enumerate() {
            let content_file_ref = format!("{}{}-{}.txt", CONTENT_PREFIX, generation, index);
            self.area
                .write(&content_file_ref, tab.content.as_deref().unwrap_or_default())
                .await?;
            tabs.push(RecoveryTab {
                file_path: tab.file_path.clone(),
                is_modified: tab.is_modified,
                cursor_position: tab.cursor_position,
                is_untitled: tab.is_untitled,
                untitled_name: tab.untitled_name.clone(),
                content_file_ref,
            });
        }

        let record = RecoveryRecord {
            timestamp: self.clock.now(),
            current_tab_index: snapshot.current_tab_index,
            tabs,
        };
        self.area
            .write(METADATA_FILE, &serde_json::to_string_pretty(&record)?)
            .await?;

        let current = format!("{}{}-", CONTENT_PREFIX, generation);
        for name in self.area.list().await? {
            if name.starts_with(CONTENT_PREFIX) && !name.starts_with(&current) {
                self.area.remove(&name).await?;
            }
        }

        log::debug!(
            "Recovery snapshot written ({} tabs, generation {})",
            record.tabs.len(),
            generation
        );
        Ok(())
    }

    /// Removes the metadata first, then every content file.
    async fn delete_snapshot(&self) -> Result<()> {
        self.area.remove(METADATA_FILE).await?;
        for name in self.area.list().await? {
            if name.starts_with(CONTENT_PREFIX) {
                self.area.remove(&name).await?;
            }
        }
        Ok(())
    }

    pub async fn clear_on_clean_shutdown(&self) -> Result<()> {
        self.delete_snapshot().await?;
        log::info!("Recovery snapshot cleared on clean shutdown");
        Ok(())
    }

    /// Looks for a snapshot left by a crash and, when one is fresh enough,
    /// asks `prompt` whether to restore it. The snapshot is gone afterwards
    /// whatever the outcome.
    pub async fn check_at_startup<F, Fut>(&self, prompt: F) -> Result<RecoveryOutcome>
    where
        F: FnOnce(RecoveryOffer) -> Fut,
        Fut: Future<Output = bool>,
    {
        let record = match self.read_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(RecoveryOutcome::NoSnapshot),
            Err(e @ (EditorError::Serialization(_) | EditorError::Read { .. })) => {
                log::warn!("Discarding corrupt recovery metadata: {}", e);
                self.delete_snapshot().await?;
                return Ok(RecoveryOutcome::Discarded);
            }
            Err(e) => return Err(e),
        };

        let age = self.clock.now() - record.timestamp;
        if age > self.max_age {
            log::info!(
                "Discarding stale recovery snapshot from {}",
                record.timestamp
            );
            self.delete_snapshot().await?;
            return Ok(RecoveryOutcome::Stale {
                timestamp: record.timestamp,
            });
        }

        let offer = RecoveryOffer {
            timestamp: record.timestamp,
            tab_count: record.tabs.len(),
        };
        if !prompt(offer).await {
            log::info!("Recovery declined");
            self.delete_snapshot().await?;
            return Ok(RecoveryOutcome::Declined);
        }

        let mut tabs = Vec::new();
        let mut skipped = Vec::new();
        let mut kept_before_current = 0;

        for (index, tab) in record.tabs.into_iter().enumerate() {
            let content = match self.area.read(&tab.content_file_ref).await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    log::warn!("Recovery content for tab {} is missing", index);
                    skipped.push(EditorError::RecoveryCorrupt {
                        tab: index,
                        reason: format!("{} is missing", tab.content_file_ref),
                    });
                    continue;
                }
                Err(e) => {
                    log::warn!("Recovery content for tab {} is unreadable: {}", index, e);
                    skipped.push(EditorError::RecoveryCorrupt {
                        tab: index,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if index < record.current_tab_index {
                kept_before_current += 1;
            }
            tabs.push(TabRecord {
                file_path: tab.file_path,
                content: Some(content),
                is_modified: tab.is_modified,
                cursor_position: tab.cursor_position,
                is_untitled: tab.is_untitled,
                untitled_name: tab.untitled_name,
            });
        }

        self.delete_snapshot().await?;
        log::info!(
            "Recovered {} tabs ({} skipped)",
            tabs.len(),
            skipped.len()
        );
        Ok(RecoveryOutcome::Recovered {
            current_tab_index: kept_before_current.min(tabs.len().saturating_sub(1)),
            tabs,
            skipped,
        })
    }
}
