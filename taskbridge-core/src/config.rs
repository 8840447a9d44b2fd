//! YAML configuration for the sync service.
//!
//! Loaded from `<root>/.taskbridge/config.yaml`. Validation rejects missing
//! or empty required keys and values still holding their `your_…` template
//! placeholders, so a half-filled config fails at startup rather than at the
//! first API call.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::AssigneeRole;

/// `<root>/.taskbridge/config.yaml` — pure, no I/O.
pub fn config_path_at(root: &Path) -> PathBuf {
    root.join(".taskbridge").join("config.yaml")
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub chat: ChatConfig,
    pub board: BoardConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Chat-platform credentials and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api_base: String,
    pub app_key: String,
    pub app_secret: String,
    /// The operator's identity on the chat platform; drives the
    /// assigned-to-me / assigned-by-me classification of inbound events.
    pub self_user_id: String,
}

/// Board-workspace credentials and the two collection ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub api_base: String,
    pub token: String,
    pub assigned_to_me_collection: String,
    pub assigned_by_me_collection: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_deadline_secs")]
    pub poll_deadline_secs: u64,
}

impl BoardConfig {
    /// The collection id holding records for `role`.
    pub fn collection_for(&self, role: AssigneeRole) -> &str {
        match role {
            AssigneeRole::AssignedToMe => &self.assigned_to_me_collection,
            AssigneeRole::AssignedByMe => &self.assigned_by_me_collection,
        }
    }
}

/// Write-retry tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: default_max_write_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_poll_deadline_secs() -> u64 {
    45
}

fn default_max_write_attempts() -> u32 {
    4
}

fn default_retry_base_ms() -> u64 {
    250
}

/// Load and validate the configuration rooted at `root`.
pub fn load_at(root: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(root);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    validate(&config)?;
    Ok(config)
}

/// `load_at` convenience wrapper rooted at the home directory.
pub fn load() -> Result<Config, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let required: [(&'static str, &str); 8] = [
        ("chat.api_base", &config.chat.api_base),
        ("chat.app_key", &config.chat.app_key),
        ("chat.app_secret", &config.chat.app_secret),
        ("chat.self_user_id", &config.chat.self_user_id),
        ("board.api_base", &config.board.api_base),
        ("board.token", &config.board.token),
        (
            "board.assigned_to_me_collection",
            &config.board.assigned_to_me_collection,
        ),
        (
            "board.assigned_by_me_collection",
            &config.board.assigned_by_me_collection,
        ),
    ];

    for (key, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingKey { key });
        }
        if value.starts_with("your_") {
            return Err(ConfigError::Placeholder {
                key,
                value: value.to_owned(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
