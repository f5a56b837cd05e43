//! Runtime configuration.
//! This module handles loading, saving and validating the
//! ~/.config/inquest/config.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{default_config_path, expand_tilde, load_config, load_config_from_path, save_config_to_path};
pub use model::{AutoUpdateConfig, ConfigError, InquestConfig, RecordingConfig};
pub use validation::validate_config;
