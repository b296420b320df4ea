//! Application configuration
//!
//! Layered: built-in defaults, then the TOML file, then `STRATUS_*` environment
//! variables (for example `STRATUS_LOG_LEVEL=debug`).

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use stratus_core::{Result, StratusError};

pub const ENV_PREFIX: &str = "STRATUS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding local databases and `dbconfig.json`
    pub data_dir: PathBuf,
    /// JSON file with the stored backup and schedule definitions
    pub store_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "stratus", "stratus")
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"));

        Self {
            store_path: data_dir.join("definitions.json"),
            log_dir: data_dir.join("logs"),
            data_dir,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Where the configuration file lives unless `--config` says otherwise
    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Load the configuration; a missing file is fine, a malformed one is not
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let defaults = Self::default();

        let settings = config::Config::builder()
            .set_default("data_dir", path_value(&defaults.data_dir))
            .and_then(|b| b.set_default("store_path", path_value(&defaults.store_path)))
            .and_then(|b| b.set_default("log_dir", path_value(&defaults.log_dir)))
            .and_then(|b| b.set_default("log_level", defaults.log_level.clone()))
            .map_err(config_error)?
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(config_error)?;

        settings.try_deserialize().map_err(config_error)
    }

    /// Write this configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| StratusError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn config_error(err: config::ConfigError) -> StratusError {
    StratusError::Config(err.to_string())
}
