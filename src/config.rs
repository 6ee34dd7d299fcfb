//! Configuration persistence for the progress engine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ValidationError;
use crate::models::MIN_EASINESS;

/// Settings for the SM-2 scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval in days at which a card counts as mastered.
    pub mastery_interval_days: u32,
    /// Keep `is_mastered` set after a later failed review.
    pub mastery_is_sticky: bool,
    pub initial_easiness: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mastery_interval_days: 30,
            mastery_is_sticky: true,
            initial_easiness: 2.5,
        }
    }
}

/// Thresholds for the pronunciation stage machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    pub discrimination_threshold: f64,
    pub production_threshold: f64,
    pub mastered_level: u8,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            discrimination_threshold: 0.8,
            production_threshold: 0.8,
            mastered_level: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Seconds after which a record lock is treated as abandoned.
    pub lock_stale_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_stale_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Extra load-apply-save attempts after a write conflict.
    pub conflict_retries: u32,
    /// Delay before the first retry.
    pub retry_initial_delay_ms: u64,
    /// Upper bound on the delay between retries.
    pub retry_max_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 8,
            retry_initial_delay_ms: 5,
            retry_max_delay_ms: 200,
        }
    }
}

/// Application configuration that persists between sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mastery: MasteryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lingo")
            .join("config.toml")
    }

    /// Load config from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load config from disk, returning default if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.validate()?;
        Ok(config)
    }

    /// Save config to disk.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;

        if self.scheduler.mastery_interval_days == 0 {
            return Err(ValidationError::Config(
                "scheduler.mastery_interval_days must be at least 1".into(),
            ));
        }
        if !(self.scheduler.initial_easiness >= MIN_EASINESS) {
            return Err(ValidationError::Config(format!(
                "scheduler.initial_easiness must be at least {}",
                MIN_EASINESS
            )));
        }
        if !in_unit(self.mastery.discrimination_threshold) {
            return Err(ValidationError::Config(
                "mastery.discrimination_threshold must be in (0, 1]".into(),
            ));
        }
        if self.storage.lock_stale_secs == 0 {
            return Err(ValidationError::Config(
                "storage.lock_stale_secs must be at least 1".into(),
            ));
        }
        if self.service.retry_initial_delay_ms > self.service.retry_max_delay_ms {
            return Err(ValidationError::Config(
                "service.retry_initial_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        if !in_unit(self.mastery.production_threshold) {
            return Err(ValidationError::Config(
                "mastery.production_threshold must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}
