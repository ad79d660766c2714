//! Resource bundles: where model histories are looked up by name.

use super::ModelHistory;
use crate::error::ConfigurationError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of model histories.
///
/// In-memory registrations take precedence over `<directory>/<name>.toml` files.
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    directory: Option<PathBuf>,
    models: HashMap<String, ModelHistory>,
}

impl ResourceBundle {
    /// Bundle backed by a directory of `<model_name>.toml` files
    pub fn directory<P: AsRef<Path>>(path: P) -> Self {
        Self {
            directory: Some(path.as_ref().to_path_buf()),
            models: HashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, history: ModelHistory) -> Self {
        self.models.insert(history.name.clone(), history);
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn load(&self, model_name: &str) -> Result<ModelHistory, ConfigurationError> {
        if let Some(history) = self.models.get(model_name) {
            history.validate()?;
            return Ok(history.clone());
        }

        let Some(directory) = &self.directory else {
            return Err(ConfigurationError::ModelNotFound(model_name.to_string()));
        };

        let path = directory.join(format!("{}.toml", model_name));
        if !path.exists() {
            return Err(ConfigurationError::ModelNotFound(format!(
                "{} (looked in {})",
                model_name,
                path.display()
            )));
        }

        debug!(path = %path.display(), "Loading model resource");
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ConfigurationError::InvalidModel(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let history = ModelHistory::from_toml(&content)?;
        if history.name != model_name {
            return Err(ConfigurationError::InvalidModel(format!(
                "{} declares model '{}', expected '{}'",
                path.display(),
                history.name,
                model_name
            )));
        }
        Ok(history)
    }
}
