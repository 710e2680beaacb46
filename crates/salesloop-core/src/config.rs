//! Salesloop runtime configuration.
//!
//! Loaded from `~/.salesloop/config.toml`; every field has a default so a
//! missing file yields a working config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SalesloopError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesloopConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub followup: FollowupConfig,
}

/// Automation job engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// How often the poller drains the job queue.
    #[serde(default = "default_automation_interval")]
    pub poll_interval_secs: u64,
}

/// Follow-up scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupConfig {
    /// How often the task runner looks for due tasks.
    #[serde(default = "default_runner_interval")]
    pub poll_interval_secs: u64,
    /// Due tasks fetched per batch while draining.
    #[serde(default = "default_due_batch")]
    pub due_batch_size: i64,
    /// Deadline on a single mail send.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_db_path() -> String {
    SalesloopConfig::home_dir()
        .join("salesloop.db")
        .to_string_lossy()
        .into_owned()
}
fn default_automation_interval() -> u64 {
    3
}
fn default_runner_interval() -> u64 {
    60
}
fn default_due_batch() -> i64 {
    5
}
fn default_send_timeout() -> u64 {
    30
}

impl Default for SalesloopConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            automation: AutomationConfig::default(),
            followup: FollowupConfig::default(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_automation_interval(),
        }
    }
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_runner_interval(),
            due_batch_size: default_due_batch(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl SalesloopConfig {
    /// Load config from the default path (`~/.salesloop/config.toml`).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SalesloopError::Config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SalesloopError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SalesloopError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Salesloop home directory (`~/.salesloop`).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".salesloop")
    }

    fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }
}
