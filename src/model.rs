//! Model Descriptions
//!
//! Declarative entity descriptions, their published version history, and the
//! version hash used to decide whether an on-disk store matches the current model.

mod bundle;

pub use bundle::ResourceBundle;

use crate::error::{ConfigurationError, StorageError};
use crate::types::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Attribute storage kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
    Binary,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Text => "text",
            AttributeKind::Integer => "integer",
            AttributeKind::Float => "float",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Binary => "binary",
        }
    }

    /// Whether a value can be stored in an attribute of this kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (AttributeKind::Text, Value::Text(_))
                | (AttributeKind::Integer, Value::Integer(_))
                | (AttributeKind::Float, Value::Float(_) | Value::Integer(_))
                | (AttributeKind::Boolean, Value::Bool(_))
                | (AttributeKind::Binary, Value::Binary(_))
        )
    }

    /// Convert `value` to this kind where the conversion is lossless, e.g.
    /// `Integer(7)` to `Text("7")` for a text attribute. Otherwise `value` is returned as is.
    pub fn coerce(&self, value: &Value) -> Value {
        match (self, value) {
            (AttributeKind::Text, Value::Integer(i)) => Value::Text(i.to_string()),
            (AttributeKind::Text, Value::Float(f)) => Value::Text(f.to_string()),
            (AttributeKind::Integer, Value::Text(t)) => match t.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => value.clone(),
            },
            (AttributeKind::Integer, Value::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Value::Integer(*f as i64)
            }
            (AttributeKind::Float, Value::Text(t)) => match t.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => value.clone(),
            },
            _ => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Name of this attribute in the previous model version
    #[serde(default)]
    pub renamed_from: Option<String>,
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
            renamed_from: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Boolean)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renamed_from = Some(previous.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub renamed_from: Option<String>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            attributes: Vec::new(),
            renamed_from: None,
        }
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.renamed_from = Some(previous.into());
        self
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Fill absent attributes that carry a default value
    pub fn apply_defaults(&self, record: &mut Record) {
        for attribute in &self.attributes {
            if let Some(default) = &attribute.default {
                if record.get(&attribute.name).is_null() {
                    record.fields.insert(attribute.name.clone(), default.clone());
                }
            }
        }
    }

    /// Check a record against this description before it is committed.
    pub fn validate_record(&self, record: &Record) -> Result<(), StorageError> {
        let invalid = |reason: String| StorageError::Validation {
            entity: self.name.clone(),
            reason,
        };

        for field in record.fields.keys() {
            if self.find_attribute(field).is_none() {
                return Err(invalid(format!("unknown attribute '{}'", field)));
            }
        }

        for attribute in &self.attributes {
            let value = record.get(&attribute.name);
            if value.is_null() {
                if !attribute.optional {
                    return Err(invalid(format!(
                        "required attribute '{}' is missing",
                        attribute.name
                    )));
                }
                continue;
            }
            if !attribute.kind.accepts(value) {
                return Err(invalid(format!(
                    "attribute '{}' expects {} but got {}",
                    attribute.name,
                    attribute.kind.as_str(),
                    value
                )));
            }
        }
        Ok(())
    }
}

/// One published version of a named model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

impl Model {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            entities: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn find_entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Deterministic hash of the storage-relevant shape of this model.
    ///
    /// Version numbers, defaults and renaming identifiers do not contribute, so two
    /// versions that store records identically hash identically.
    pub fn version_hash(&self) -> String {
        let mut entities: Vec<&EntityDescription> = self.entities.iter().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = blake3::Hasher::new();
        for entity in entities {
            hasher.update(b"entity:");
            hasher.update(entity.name.as_bytes());
            hasher.update(b"|pk:");
            hasher.update(entity.primary_key.as_deref().unwrap_or("").as_bytes());
            let mut attributes: Vec<&AttributeDescription> = entity.attributes.iter().collect();
            attributes.sort_by(|a, b| a.name.cmp(&b.name));
            for attribute in attributes {
                hasher.update(b"|attr:");
                hasher.update(attribute.name.as_bytes());
                hasher.update(b":");
                hasher.update(attribute.kind.as_str().as_bytes());
                hasher.update(if attribute.optional { b":o" } else { b":r" });
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| {
            ConfigurationError::InvalidModel(format!("{} v{}: {}", self.name, self.version, msg))
        };

        let mut entity_names = HashSet::new();
        for entity in &self.entities {
            if entity.name.is_empty() {
                return Err(invalid("entity name cannot be empty".to_string()));
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(invalid(format!("duplicate entity '{}'", entity.name)));
            }

            let mut attribute_names = HashSet::new();
            for attribute in &entity.attributes {
                if !attribute_names.insert(attribute.name.as_str()) {
                    return Err(invalid(format!(
                        "duplicate attribute '{}.{}'",
                        entity.name, attribute.name
                    )));
                }
                if let Some(default) = &attribute.default {
                    if !attribute.kind.accepts(default) {
                        return Err(invalid(format!(
                            "default for '{}.{}' does not match kind {}",
                            entity.name,
                            attribute.name,
                            attribute.kind.as_str()
                        )));
                    }
                }
            }

            if let Some(pk) = &entity.primary_key {
                match entity.find_attribute(pk) {
                    Some(attribute) if attribute.optional => {
                        return Err(invalid(format!(
                            "primary key '{}.{}' cannot be optional",
                            entity.name, pk
                        )))
                    }
                    Some(_) => {}
                    None => {
                        return Err(invalid(format!(
                            "primary key '{}.{}' is not an attribute",
                            entity.name, pk
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Every published version of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHistory {
    pub name: String,
    /// Explicit current version; the highest version when absent
    #[serde(default)]
    pub current: Option<u32>,
    #[serde(default)]
    pub versions: Vec<Model>,
}

impl ModelHistory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
            versions: Vec::new(),
        }
    }

    /// Add a version; the model takes the history's name.
    pub fn version(mut self, mut model: Model) -> Self {
        model.name = self.name.clone();
        self.versions.push(model);
        self.versions.sort_by_key(|m| m.version);
        self
    }

    pub fn current(mut self, version: u32) -> Self {
        self.current = Some(version);
        self
    }

    /// Parse a history from its TOML resource form
    pub fn from_toml(content: &str) -> Result<Self, ConfigurationError> {
        let mut history: ModelHistory = toml::from_str(content)
            .map_err(|e| ConfigurationError::InvalidModel(e.to_string()))?;
        for model in &mut history.versions {
            model.name = history.name.clone();
        }
        history.versions.sort_by_key(|m| m.version);
        history.validate()?;
        Ok(history)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.versions.is_empty() {
            return Err(ConfigurationError::InvalidModel(format!(
                "model '{}' has no versions",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for model in &self.versions {
            if !seen.insert(model.version) {
                return Err(ConfigurationError::InvalidModel(format!(
                    "model '{}' declares version {} twice",
                    self.name, model.version
                )));
            }
            model.validate()?;
        }
        if let Some(current) = self.current {
            if self.find_version(current).is_none() {
                return Err(ConfigurationError::InvalidModel(format!(
                    "model '{}' declares unknown current version {}",
                    self.name, current
                )));
            }
        }
        Ok(())
    }

    pub fn find_version(&self, version: u32) -> Option<&Model> {
        self.versions.iter().find(|m| m.version == version)
    }

    /// The model the client must run against
    pub fn target(&self) -> Result<&Model, ConfigurationError> {
        let found = match self.current {
            Some(version) => self.find_version(version),
            None => self.versions.iter().max_by_key(|m| m.version),
        };
        found.ok_or_else(|| ConfigurationError::ModelNotFound(self.name.clone()))
    }

    /// Latest version whose hash matches, if any
    pub fn find_by_hash(&self, hash: &str) -> Option<&Model> {
        self.versions
            .iter()
            .rev()
            .find(|m| m.version_hash() == hash)
    }

    /// Versions strictly after `from` up to and including `to`, ascending.
    pub fn path_between(&self, from: u32, to: u32) -> Vec<&Model> {
        self.versions
            .iter()
            .filter(|m| m.version > from && m.version <= to)
            .collect()
    }
}
