//! Configuration IO helpers.

use super::{ConfigError, InquestConfig, validate_config};
use dirs_next::{config_dir, home_dir};
use std::env;
use std::fs;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration location.
pub const CONFIG_PATH_ENV: &str = "INQUEST_CONFIG_PATH";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("inquest").join("config.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<InquestConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads configuration from `path`; a missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<InquestConfig, ConfigError> {
    if !path.exists() {
        return Ok(InquestConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: InquestConfig = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn save_config_to_path(config: &InquestConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config(config)?;
    if let Some(parent_directory) = path.parent() {
        create_dir_all(parent_directory)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    write(path, content)?;
    Ok(())
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/").or_else(|| p.strip_prefix("~\\")) {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}
