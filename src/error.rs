//! Error types for the tierstore persistence client.
//!
//! Operation errors ([`ApiError`]) are delivered through an operation's handle.
//! Construction errors ([`InitError`]) are fatal: the client cannot be used.

use crate::types::Value;
use thiserror::Error;

/// Storage-related errors raised by the physical store or a commit cascade
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage engine error: {0}")]
    Engine(String),

    #[error("Record encoding error: {0}")]
    Encoding(String),

    #[error("Duplicate primary key {key} for entity '{entity}'")]
    UniqueViolation { entity: String, key: Value },

    #[error("Invalid record for entity '{entity}': {reason}")]
    Validation { entity: String, reason: String },

    #[error("Store model '{found}' is incompatible with current model '{expected}'")]
    IncompatibleModel { expected: String, found: String },

    #[error("Store contains records but carries no model metadata")]
    UnknownSchema,

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Engine(err.to_string())
    }
}

/// Migration failures. Every variant is fatal at construction time.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Store is incompatible with model version {target}: {reason}")]
    Incompatible { target: u32, reason: String },

    #[error("Cannot infer mapping for {entity}.{attribute}: {reason}")]
    CannotInferMapping {
        entity: String,
        attribute: String,
        reason: String,
    },

    #[error("Store version hash {0} does not match any known model version")]
    UnknownSourceVersion(String),

    #[error("Migration step {from} -> {to} failed: {reason}")]
    StepFailed { from: u32, to: u32, reason: String },

    #[error("Failed to remove store at {path}: {source}")]
    RemoveFailed {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Storage error during migration: {0}")]
    Storage(#[from] StorageError),
}

/// Programming or setup mistakes; never transient.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Model '{0}' not found in resource bundle")]
    ModelNotFound(String),

    #[error("Invalid model definition: {0}")]
    InvalidModel(String),

    #[error("Entity '{0}' is not part of the current model")]
    UnknownEntity(String),

    #[error("Entity '{entity}' declares primary key {declared:?} but the type reports {reported:?}")]
    PrimaryKeyMismatch {
        entity: String,
        declared: Option<String>,
        reported: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No data directory available for application '{0}'")]
    DataDirUnavailable(String),
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::Config(err.to_string())
    }
}

/// A stored record could not be turned back into a domain object.
#[derive(Debug, Clone, Error)]
#[error("Cannot convert '{entity}' record: {reason}")]
pub struct ConversionError {
    pub entity: String,
    pub reason: String,
}

impl ConversionError {
    pub fn new(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_field(entity: &str, field: &str) -> Self {
        Self::new(entity, format!("missing or mistyped field '{}'", field))
    }
}

/// Errors delivered through an operation handle
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("The {0} sequence is closed")]
    Closed(&'static str),
}

/// Fatal errors raised while constructing a client
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("Failed to start {label} sequence: {source}")]
    Sequence {
        label: &'static str,
        source: std::io::Error,
    },
}
