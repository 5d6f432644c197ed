use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::try_exists;

use crate::file_manager::write_atomic;

const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;
const MAX_AGE_HOURS: i64 = 24 * 365;
const MAX_SIZE_MB: u64 = 1024 * 1024;

/// Megabytes to bytes, saturating instead of overflowing.
pub(crate) fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub autosave: AutoSaveConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub editor: EditorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub max_age_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub restore_session: bool,
    /// Keep the text of saved, unmodified tabs in the session record too.
    pub persist_clean_content: bool,
    pub max_recent_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub check_interval_secs: u64,
    pub low_memory_threshold_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    pub large_file_warning_mb: u64,
    pub create_backup: bool,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { max_age_hours: 24 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restore_session: true,
            persist_clean_content: true,
            max_recent_files: 10,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            low_memory_threshold_mb: 100,
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            large_file_warning_mb: 50,
            create_backup: true,
        }
    }
}

impl AutoSaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MemoryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn threshold_bytes(&self) -> u64 {
        mb_to_bytes(self.low_memory_threshold_mb)
    }
}

impl RecoveryConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.max_age_hours.clamp(0, MAX_AGE_HOURS))
            .unwrap_or_else(|| chrono::Duration::hours(24))
    }
}

impl Config {
    /// Loads the config file, falling back to (and writing out) defaults
    /// when it is missing, empty or unparsable.
    pub async fn load() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };

        if let Some(mut config) = Self::read_existing(&path).await? {
            config.validate()?;
            log::info!("Loaded config from {}", path.display());
            return Ok(config);
        }

        let config = Self::default();
        if let Err(e) = config.save().await {
            log::warn!("Could not write default config: {}", e);
        }
        Ok(config)
    }

    async fn read_existing(path: &Path) -> Result<Option<Self>> {
        if !try_exists(path).await? {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(None);
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                log::error!("Cannot read config {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        if content.trim().is_empty() {
            log::warn!("Config file {} is empty, rewriting defaults", path.display());
            return Ok(None);
        }

        match serde_json::from_str::<Self>(&content) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                log::error!("Invalid config {}: {}", path.display(), e);
                let backup = path.with_extension("bak");
                match tokio::fs::copy(path, &backup).await {
                    Ok(_) => log::info!("Kept the broken config as {}", backup.display()),
                    Err(e) => log::warn!("Could not back up the broken config: {}", e),
                }
                Ok(None)
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        let mut config = self.clone();
        config.validate()?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&config).context("failed to serialize config")?;
        write_atomic(&path, &json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Replaces out-of-range values with defaults.
    pub fn validate(&mut self) -> Result<()> {
        let mut has_issues = false;

        if self.autosave.interval_secs == 0 || self.autosave.interval_secs > 3600 {
            log::warn!(
                "Invalid auto-save interval: {}s, using default",
                self.autosave.interval_secs
            );
            self.autosave.interval_secs = 30;
            has_issues = true;
        }

        if self.recovery.max_age_hours <= 0 || self.recovery.max_age_hours > MAX_AGE_HOURS {
            log::warn!(
                "Invalid recovery max age: {}h, using default",
                self.recovery.max_age_hours
            );
            self.recovery.max_age_hours = 24;
            has_issues = true;
        }

        if self.memory.check_interval_secs == 0 || self.memory.check_interval_secs > MAX_INTERVAL_SECS
        {
            log::warn!(
                "Invalid memory check interval: {}s, using default",
                self.memory.check_interval_secs
            );
            self.memory.check_interval_secs = 60;
            has_issues = true;
        }

        if self.memory.low_memory_threshold_mb > MAX_SIZE_MB {
            log::warn!(
                "Invalid low memory threshold: {}MB, using default",
                self.memory.low_memory_threshold_mb
            );
            self.memory.low_memory_threshold_mb = 100;
            has_issues = true;
        }

        if self.editor.large_file_warning_mb > MAX_SIZE_MB {
            log::warn!(
                "Invalid large file warning size: {}MB, using default",
                self.editor.large_file_warning_mb
            );
            self.editor.large_file_warning_mb = 50;
            has_issues = true;
        }

        if self.session.max_recent_files == 0 || self.session.max_recent_files > 100 {
            log::warn!(
                "Invalid recent file limit: {}, using default",
                self.session.max_recent_files
            );
            self.session.max_recent_files = 10;
            has_issues = true;
        }

        if has_issues {
            log::info!("Config corrected during validation");
        }

        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("QUILLPAD_CONFIG_PATH") {
            return Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("QUILLPAD_CONFIG_DIR") {
            return Some(PathBuf::from(dir).join("config.json"));
        }

        ProjectDirs::from("com", "quillpad", "quillpad")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Where settings and recovery data live.
    pub fn data_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("QUILLPAD_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let dirs = ProjectDirs::from("com", "quillpad", "quillpad")
            .ok_or_else(|| anyhow::anyhow!("could not determine the project data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn config_test_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_config_dir(path: &std::path::Path) -> (Option<String>, Option<String>) {
        let previous_dir = std::env::var("QUILLPAD_CONFIG_DIR").ok();
        let previous_path = std::env::var("QUILLPAD_CONFIG_PATH").ok();
        std::env::set_var("QUILLPAD_CONFIG_DIR", path);
        std::env::remove_var("QUILLPAD_CONFIG_PATH");
        (previous_dir, previous_path)
    }

    fn restore_config_env(previous: (Option<String>, Option<String>)) {
        match previous.0 {
            Some(value) => std::env::set_var("QUILLPAD_CONFIG_DIR", value),
            None => std::env::remove_var("QUILLPAD_CONFIG_DIR"),
        }

        match previous.1 {
            Some(value) => std::env::set_var("QUILLPAD_CONFIG_PATH", value),
            None => std::env::remove_var("QUILLPAD_CONFIG_PATH"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.autosave.enabled);
        assert_eq!(config.autosave.interval(), Duration::from_secs(30));
        assert_eq!(config.recovery.max_age(), chrono::Duration::hours(24));
        assert!(config.session.restore_session);
        assert!(config.session.persist_clean_content);
        assert_eq!(config.session.max_recent_files, 10);
        assert_eq!(config.memory.threshold_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_validate_fixes_out_of_range_values() {
        let mut config = Config::default();
        config.autosave.interval_secs = 0;
        config.recovery.max_age_hours = -3;
        config.session.max_recent_files = 0;

        config.validate().unwrap();

        assert_eq!(config.autosave.interval_secs, 30);
        assert_eq!(config.recovery.max_age_hours, 24);
        assert_eq!(config.session.max_recent_files, 10);
    }

    #[test]
    fn test_validate_caps_oversized_values() {
        let mut config = Config::default();
        config.recovery.max_age_hours = i64::MAX;
        config.memory.check_interval_secs = u64::MAX;
        config.memory.low_memory_threshold_mb = u64::MAX / 2;
        config.editor.large_file_warning_mb = u64::MAX;

        config.validate().unwrap();

        assert_eq!(config.recovery.max_age_hours, 24);
        assert_eq!(config.memory.check_interval_secs, 60);
        assert_eq!(config.memory.low_memory_threshold_mb, 100);
        assert_eq!(config.editor.large_file_warning_mb, 50);
    }

    #[test]
    fn test_unvalidated_values_do_not_overflow() {
        let mut config = Config::default();
        config.recovery.max_age_hours = i64::MAX;
        config.memory.low_memory_threshold_mb = u64::MAX / 2;

        assert_eq!(config.memory.threshold_bytes(), u64::MAX);
        assert_eq!(
            config.recovery.max_age(),
            chrono::Duration::hours(MAX_AGE_HOURS)
        );
        assert_eq!(mb_to_bytes(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"autosave": {"enabled": false, "interval_secs": 5}}"#)
                .unwrap();
        assert!(!config.autosave.enabled);
        assert_eq!(config.autosave.interval_secs, 5);
        assert_eq!(config.recovery.max_age_hours, 24);
    }

    #[tokio::test]
    async fn test_config_load_default() {
        let _guard = config_test_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let previous_env = set_config_dir(temp_dir.path());

        let config = Config::load().await.unwrap();
        assert_eq!(config.autosave.interval_secs, 30);
        assert!(temp_dir.path().join("config.json").exists());

        restore_config_env(previous_env);
    }

    #[tokio::test]
    async fn test_broken_config_is_backed_up() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("config.json"), "{ not json").unwrap();
        let _guard = config_test_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous_env = set_config_dir(temp_dir.path());

        let config = Config::load().await.unwrap();
        assert!(config.autosave.enabled);
        assert!(temp_dir.path().join("config.bak").exists());

        restore_config_env(previous_env);
    }
}
