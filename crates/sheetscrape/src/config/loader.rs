use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than 0".to_string(),
        });
    }

    if config.checkpoint_rows == 0 {
        return Err(ConfigError::Validation {
            message: "checkpoint_rows must be greater than 0".to_string(),
        });
    }

    if config.event_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "event_capacity must be greater than 0".to_string(),
        });
    }

    if config.accepted_extensions.is_empty() {
        return Err(ConfigError::Validation {
            message: "accepted_extensions must not be empty".to_string(),
        });
    }

    for ext in &config.accepted_extensions {
        if ext.is_empty() || ext.starts_with('.') || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Validation {
                message: format!(
                    "Invalid extension '{}': use bare alphanumeric extensions like \"xlsx\"",
                    ext
                ),
            });
        }
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => {
            return Err(ConfigError::Validation {
                message: format!("Invalid log level: {}", other),
            });
        }
    }

    Ok(())
}
