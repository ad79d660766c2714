//! Shared test utilities for integration tests
//!
//! Domain types, model histories and isolated client construction. Every client
//! gets an explicit configuration pointing into a temp dir, so tests never read
//! the user's config files or data directory.

use std::path::Path;
use tempfile::TempDir;
use tierstore::config::StoreConfig;
use tierstore::{
    AttributeDescription, Client, ConversionError, EntityDescription, MigrationStrategy, Model,
    ModelHistory, Record, ResourceBundle, Storable, Value,
};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
}

impl User {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl Storable for User {
    fn entity_name() -> &'static str {
        "User"
    }

    fn primary_key_field() -> Option<&'static str> {
        Some("id")
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        tierstore::storable::base_record::<Self>(existing)
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            id: record
                .text("id")
                .ok_or_else(|| ConversionError::missing_field("User", "id"))?
                .to_string(),
            name: record
                .text("name")
                .ok_or_else(|| ConversionError::missing_field("User", "name"))?
                .to_string(),
        })
    }

    fn primary_value(&self) -> Option<Value> {
        Some(Value::from(self.id.as_str()))
    }
}

/// Keyless entity: every insert creates a new record
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub body: String,
}

impl Storable for Note {
    fn entity_name() -> &'static str {
        "Note"
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        tierstore::storable::base_record::<Self>(existing).with("body", self.body.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        record
            .text("body")
            .map(|body| Note {
                body: body.to_string(),
            })
            .ok_or_else(|| ConversionError::missing_field("Note", "body"))
    }
}

/// Not part of any test model
#[derive(Debug, Clone, PartialEq)]
pub struct Stranger;

impl Storable for Stranger {
    fn entity_name() -> &'static str {
        "Stranger"
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        tierstore::storable::base_record::<Self>(existing)
    }

    fn from_record(_: &Record) -> Result<Self, ConversionError> {
        Ok(Stranger)
    }
}

pub fn library_v1() -> Model {
    Model::new("Library", 1)
        .entity(
            EntityDescription::new("User")
                .primary_key("id")
                .attribute(AttributeDescription::text("id"))
                .attribute(AttributeDescription::text("name")),
        )
        .entity(EntityDescription::new("Note").attribute(AttributeDescription::text("body")))
}

pub fn library_history() -> ModelHistory {
    ModelHistory::new("Library").version(library_v1())
}

/// Isolated config with stores under `dir`
pub fn config_in(dir: &Path) -> StoreConfig {
    StoreConfig {
        data_dir: Some(dir.to_path_buf()),
        resource_dir: dir.join("models"),
        ..StoreConfig::default()
    }
}

pub fn open_with(dir: &TempDir, history: ModelHistory, strategy: MigrationStrategy) -> Client {
    let name = history.name.clone();
    Client::builder(name)
        .bundle(ResourceBundle::in_memory().with_model(history))
        .config(config_in(dir.path()))
        .strategy(strategy)
        .open()
        .unwrap()
}

pub fn open_library(dir: &TempDir) -> Client {
    open_with(dir, library_history(), MigrationStrategy::Lightweight)
}
