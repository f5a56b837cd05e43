//! Data models for runtime configuration.

use super::io::expand_tilde;
use dirs_next::home_dir;
use inquest_types::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Shutdown budget used when the configuration does not set one.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 120;

/// Top-level configuration shared by the coordinator and its runtimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InquestConfig {
    /// Directories scanned for installed providers.
    #[serde(default = "default_provider_paths")]
    pub provider_paths: Vec<String>,

    /// Upper bound for provider shutdown when a runtime closes.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub auto_update: AutoUpdateConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    /// Feature flags forwarded to every provider connection.
    #[serde(default)]
    pub features: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,
}

impl Default for InquestConfig {
    fn default() -> Self {
        Self {
            provider_paths: default_provider_paths(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            auto_update: AutoUpdateConfig::default(),
            recording: RecordingConfig::default(),
            features: Vec::new(),
            upstream: None,
        }
    }
}

impl InquestConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Provider directories with `~` expanded.
    pub fn provider_dirs(&self) -> Vec<PathBuf> {
        self.provider_paths.iter().map(|p| expand_tilde(p)).collect()
    }
}

/// Installation of missing providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AutoUpdateConfig {
    pub enabled: bool,
    /// How old an installed provider may get before the installer refreshes it.
    pub refresh_interval_secs: u64,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 3600,
        }
    }
}

impl AutoUpdateConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordingConfig {
    /// Recording file; in-memory only when unset.
    #[serde(default)]
    pub path: Option<String>,
    /// Replay the file instead of reaching live providers.
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn default_provider_paths() -> Vec<String> {
    match home_dir() {
        Some(home) => vec![home.join(".inquest").join("providers").display().to_string()],
        None => Vec::new(),
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}
