//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, an optional
//! explicit file, then `TIERSTORE__*` environment overrides (double underscore
//! separates nested keys, e.g. `TIERSTORE__LOGGING__LEVEL=debug`).

use crate::error::ConfigurationError;
use crate::logging::LoggingConfig;
use crate::store::JournalMode;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

mod merge;
mod sources;

pub use sources::global_file::global_config_path;

/// Application identity used to resolve the platform data directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_qualifier")]
    pub qualifier: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_application")]
    pub name: String,
}

fn default_qualifier() -> String {
    "org".to_string()
}

fn default_organization() -> String {
    "tierstore".to_string()
}

fn default_application() -> String {
    "tierstore".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            qualifier: default_qualifier(),
            organization: default_organization(),
            name: default_application(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Overrides the platform data directory
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory of `<model_name>.toml` model histories
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,

    #[serde(default)]
    pub journal: JournalMode,

    /// Background flush interval; 0 disables the flusher
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_flush_every_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            data_dir: None,
            resource_dir: default_resource_dir(),
            journal: JournalMode::default(),
            flush_every_ms: default_flush_every_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.application.name.trim().is_empty() {
            return Err(ConfigurationError::Config(
                "application.name cannot be empty".to_string(),
            ));
        }
        if self.resource_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::Config(
                "resource_dir cannot be empty".to_string(),
            ));
        }
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigurationError::Config(
                    "data_dir cannot be empty when set".to_string(),
                ));
            }
        }
        self.logging.validate()
    }

    pub fn flush_interval(&self) -> Option<u64> {
        (self.flush_every_ms > 0).then_some(self.flush_every_ms)
    }

    /// Directory stores live in
    pub fn data_dir(&self) -> Result<PathBuf, ConfigurationError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let app = &self.application;
        ProjectDirs::from(&app.qualifier, &app.organization, &app.name)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| ConfigurationError::DataDirUnavailable(app.name.clone()))
    }

    /// `<data_dir>/<model_name>.store`
    pub fn store_path(&self, model_name: &str) -> Result<PathBuf, ConfigurationError> {
        Ok(self.data_dir()?.join(format!("{}.store", model_name)))
    }
}

/// Loads [`StoreConfig`] from every source in precedence order
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(explicit: Option<&Path>) -> Result<StoreConfig, ConfigurationError> {
        let mut builder = merge::merge_policy::builder_with_defaults()?;
        builder = sources::global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            debug!(config_path = %path.display(), "Using explicit configuration file");
            builder = sources::explicit_file::add_to_builder(builder, path)?;
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TIERSTORE")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: StoreConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
