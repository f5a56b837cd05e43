//! Configuration validation.

use super::{ConfigError, InquestConfig};
use tracing::debug;

/// Validate the entire configuration.
pub fn validate_config(config: &InquestConfig) -> Result<(), ConfigError> {
    if config.shutdown_timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            message: "shutdownTimeoutSecs must be greater than zero".to_string(),
        });
    }

    if let Some(idx) = config.provider_paths.iter().position(|p| p.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            message: format!("providerPaths[{idx}] is empty"),
        });
    }

    if config.recording.read_only && config.recording.path.is_none() {
        return Err(ConfigError::Invalid {
            message: "recording.readOnly requires recording.path".to_string(),
        });
    }

    debug!(provider_paths = config.provider_paths.len(), "validated configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&InquestConfig::default()).is_ok());
    }

    #[test]
    fn blank_provider_path_is_reported_by_index() {
        let config = InquestConfig {
            provider_paths: vec!["/opt".into(), " ".into()],
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("providerPaths[1]"));
    }

    #[test]
    fn replay_needs_a_recording_file() {
        let config = InquestConfig {
            recording: RecordingConfig {
                path: None,
                read_only: true,
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
