use std::path::Path;

use crate::config::schema::{normalize_extension, DocumentFormat, ImportConfig, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/import-config-v1.json");

pub const ENV_DATABASE_PATH: &str = "STORYPORT_DATABASE_PATH";
pub const ENV_WORKER_COUNT: &str = "STORYPORT_WORKER_COUNT";
pub const ENV_MAX_ARCHIVE_BYTES: &str = "STORYPORT_MAX_ARCHIVE_BYTES";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ImportConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ImportConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Applies `STORYPORT_*` environment overrides on top of a loaded config
/// and re-validates the result.
pub fn apply_env_overrides(config: &mut ImportConfig) -> Result<(), ConfigError> {
    if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
        if !path.trim().is_empty() {
            config.database_path = Some(path);
        }
    }

    if let Ok(value) = std::env::var(ENV_WORKER_COUNT) {
        config.worker_count = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: ENV_WORKER_COUNT,
            value: value.clone(),
        })?;
    }

    if let Ok(value) = std::env::var(ENV_MAX_ARCHIVE_BYTES) {
        config.max_archive_bytes = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: ENV_MAX_ARCHIVE_BYTES,
            value: value.clone(),
        })?;
    }

    validate_config(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();

    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub(crate) fn validate_config(config: &ImportConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_archive_bytes == 0 || config.max_entry_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "Size limits must be greater than zero".to_string(),
        });
    }

    if !(1..=1000).contains(&config.checkpoint_interval) {
        return Err(ConfigError::Validation {
            message: format!(
                "checkpoint_interval must be between 1 and 1000, got {}",
                config.checkpoint_interval
            ),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than zero".to_string(),
        });
    }

    if config.queue_capacity == Some(0) {
        return Err(ConfigError::Validation {
            message: "queue_capacity must be greater than zero".to_string(),
        });
    }

    if config.supported_extensions.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one supported extension is required".to_string(),
        });
    }

    // Every accepted extension must reach a decoder.
    for ext in &config.supported_extensions {
        if DocumentFormat::from_extension(ext).is_none() {
            return Err(ConfigError::UnsupportedExtension(normalize_extension(ext)));
        }
    }

    Ok(())
}
