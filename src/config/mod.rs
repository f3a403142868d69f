//! Configuration management.
//!
//! One [`AppConfig`] per run, read from `~/.config/vmod-forge/config.json`
//! (or an explicit `--config` path). Every field has a default, so a missing
//! file or a partial one is valid.

pub mod loader;

pub use loader::{
    get_global_config_path, load_config_from_file, load_global_config, validate_config_path,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::kernel::CompatTable;
use crate::models::OptimizationMode;
use crate::policy::Errata;

/// Default number of non-original backups kept.
pub const DEFAULT_RETENTION: usize = 3;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root that `/proc`, `/sys` and `/lib/modules` are read from.
    pub sys_root: PathBuf,

    /// Live module source tree (unpacked `vmmon-only/` and `vmnet-only/`).
    pub module_source_dir: PathBuf,

    /// Backup store root.
    pub backup_dir: PathBuf,

    /// Where exported plans are written.
    pub plan_dir: PathBuf,

    pub log_dir: PathBuf,

    /// Non-original backups to keep.
    pub retention: usize,

    /// Module identifiers carried in every plan.
    pub modules: Vec<String>,

    pub default_mode: OptimizationMode,

    /// Compatibility table override; the built-in table is used when unset.
    pub compat_table: Option<PathBuf>,

    /// Microarchitecture-specific instruction-set suppressions.
    pub errata: Errata,

    /// Only offer kernels the compatibility table covers.
    pub supported_only: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            sys_root: PathBuf::from("/"),
            module_source_dir: PathBuf::from("/usr/lib/vmware/modules/source"),
            backup_dir: PathBuf::from("/var/lib/vmod-forge/backups"),
            plan_dir: PathBuf::from("/var/lib/vmod-forge/plans"),
            log_dir: PathBuf::from("/var/log/vmod-forge"),
            retention: DEFAULT_RETENTION,
            modules: vec!["vmmon".to_string(), "vmnet".to_string()],
            default_mode: OptimizationMode::Optimized,
            compat_table: None,
            errata: Errata::none(),
            supported_only: true,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the global location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => load_config_from_file(path)?,
            None => load_global_config()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "At least one module must be configured".to_string(),
            ));
        }
        if let Some(empty) = self.modules.iter().find(|m| m.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid module identifier: {:?}",
                empty
            )));
        }

        let paths = [
            ("sys_root", &self.sys_root),
            ("module_source_dir", &self.module_source_dir),
            ("backup_dir", &self.backup_dir),
            ("plan_dir", &self.plan_dir),
            ("log_dir", &self.log_dir),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if self.backup_dir.starts_with(&self.module_source_dir) {
            return Err(ConfigError::ValidationFailed(
                "backup_dir must not be inside module_source_dir".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured compatibility table, or the built-in one.
    pub fn compat_table(&self) -> Result<CompatTable, ConfigError> {
        match &self.compat_table {
            Some(path) => CompatTable::load(path),
            None => CompatTable::builtin()
                .map_err(|e| ConfigError::ValidationFailed(e.to_string())),
        }
    }
}
