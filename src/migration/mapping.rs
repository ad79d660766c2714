//! Inferred mapping between two model versions

use crate::error::MigrationError;
use crate::model::{AttributeDescription, AttributeKind, EntityDescription, Model};
use crate::types::{Record, Value};
use std::collections::BTreeMap;

/// Where a target attribute takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeSource {
    Copy(String),
    /// Integer source stored into a float attribute
    Widen(String),
    /// Copy, substituting a default for null (optional source, required target)
    CopyOrDefault(String, Value),
    Default(Value),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMapping {
    pub target: String,
    pub source: AttributeSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMapping {
    pub source: String,
    pub target: String,
    pub attributes: Vec<AttributeMapping>,
}

/// Per-entity mappings from a source model to a target model.
///
/// Source entities with no mapping are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingModel {
    pub source_version: u32,
    pub target_version: u32,
    pub entities: Vec<EntityMapping>,
}

fn find_source_entity<'a>(source: &'a Model, target: &EntityDescription) -> Option<&'a EntityDescription> {
    source.find_entity(&target.name).or_else(|| {
        target
            .renamed_from
            .as_deref()
            .and_then(|previous| source.find_entity(previous))
    })
}

fn find_source_attribute<'a>(
    source: &'a EntityDescription,
    target: &AttributeDescription,
) -> Option<&'a AttributeDescription> {
    source.find_attribute(&target.name).or_else(|| {
        target
            .renamed_from
            .as_deref()
            .and_then(|previous| source.find_attribute(previous))
    })
}

fn map_attribute(
    entity: &str,
    source: Option<&AttributeDescription>,
    target: &AttributeDescription,
) -> Result<AttributeSource, MigrationError> {
    let cannot = |reason: String| MigrationError::CannotInferMapping {
        entity: entity.to_string(),
        attribute: target.name.clone(),
        reason,
    };

    let Some(source) = source else {
        return match (&target.default, target.optional) {
            (Some(default), _) => Ok(AttributeSource::Default(default.clone())),
            (None, true) => Ok(AttributeSource::Null),
            (None, false) => Err(cannot(
                "new required attribute has no default value".to_string(),
            )),
        };
    };

    let copy = match (source.kind, target.kind) {
        (from, to) if from == to => AttributeSource::Copy(source.name.clone()),
        (AttributeKind::Integer, AttributeKind::Float) => AttributeSource::Widen(source.name.clone()),
        (from, to) => {
            return Err(cannot(format!(
                "kind changed from {} to {}",
                from.as_str(),
                to.as_str()
            )))
        }
    };

    if source.optional && !target.optional {
        return match (&target.default, copy) {
            (Some(default), AttributeSource::Copy(name)) => {
                Ok(AttributeSource::CopyOrDefault(name, default.clone()))
            }
            (Some(default), AttributeSource::Widen(name)) => {
                Ok(AttributeSource::CopyOrDefault(name, default.clone()))
            }
            _ => Err(cannot(
                "optional attribute became required without a default".to_string(),
            )),
        };
    }
    Ok(copy)
}

/// Infer how records of `source` become records of `target`.
pub fn infer(source: &Model, target: &Model) -> Result<MappingModel, MigrationError> {
    let mut entities = Vec::new();
    for target_entity in &target.entities {
        let Some(source_entity) = find_source_entity(source, target_entity) else {
            continue;
        };
        let attributes = target_entity
            .attributes
            .iter()
            .map(|attribute| {
                let source_attribute = find_source_attribute(source_entity, attribute);
                Ok(AttributeMapping {
                    target: attribute.name.clone(),
                    source: map_attribute(&target_entity.name, source_attribute, attribute)?,
                })
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;
        entities.push(EntityMapping {
            source: source_entity.name.clone(),
            target: target_entity.name.clone(),
            attributes,
        });
    }
    Ok(MappingModel {
        source_version: source.version,
        target_version: target.version,
        entities,
    })
}

impl MappingModel {
    /// Map one record; `None` when its entity no longer exists.
    pub fn migrate_record(&self, record: &Record) -> Option<Record> {
        let mapping = self.entities.iter().find(|e| e.source == record.entity)?;
        let mut fields = BTreeMap::new();
        for attribute in &mapping.attributes {
            let value = match &attribute.source {
                AttributeSource::Copy(name) => record.get(name).clone(),
                AttributeSource::Widen(name) => match record.get(name) {
                    Value::Integer(n) => Value::Float(*n as f64),
                    other => other.clone(),
                },
                AttributeSource::CopyOrDefault(name, default) => {
                    let value = match record.get(name) {
                        Value::Integer(n) if matches!(default, Value::Float(_)) => {
                            Value::Float(*n as f64)
                        }
                        other => other.clone(),
                    };
                    if value.is_null() {
                        default.clone()
                    } else {
                        value
                    }
                }
                AttributeSource::Default(value) => value.clone(),
                AttributeSource::Null => Value::Null,
            };
            if !value.is_null() {
                fields.insert(attribute.target.clone(), value);
            }
        }
        Some(Record {
            entity: mapping.target.clone(),
            object_id: record.object_id,
            fields,
        })
    }
}
