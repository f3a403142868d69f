//! Config file loader and serialization.

use crate::config::AppConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global config path: ~/.config/vmod-forge/config.json
pub fn get_global_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .ok_or_else(|| {
            ConfigError::ValidationFailed("Cannot determine home directory".to_string())
        })?;

    Ok(config_dir.join("vmod-forge").join("config.json"))
}

/// Load config from JSON file.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: AppConfig = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    Ok(config)
}

/// Load the global config, falling back to defaults when it does not exist.
pub fn load_global_config() -> Result<AppConfig, ConfigError> {
    let path = get_global_config_path()?;
    match load_config_from_file(&path) {
        Ok(config) => {
            log::debug!("[Config] Loaded {}", path.display());
            Ok(config)
        }
        Err(ConfigError::FileNotFound(_)) => {
            log::debug!("[Config] No config at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .json extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .json extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
