//! Migration state machine and the three recovery strategies

use super::mapping::infer;
use super::{MigrationDescriptor, MigrationState, MigrationStrategy};
use crate::error::{MigrationError, StorageError};
use crate::model::{Model, ModelHistory};
use crate::store::{key_fields, JournalMode, SledRecordStore, StoreMetadata};
use crate::types::Record;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Opened store, ready for a coordinator
pub struct MigrationOutcome {
    pub store: SledRecordStore,
    pub state: MigrationState,
    pub journal: JournalMode,
}

/// Read-only view of a store's model identity
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub metadata: Option<StoreMetadata>,
    /// History version whose hash matches the stored hash
    pub stored_version: Option<u32>,
    pub target_version: u32,
    pub state: MigrationState,
    pub record_count: usize,
}

enum Compatibility {
    Compatible(StoreMetadata),
    /// No metadata and no records
    Fresh,
    /// Records present but never stamped
    Unstamped,
    Incompatible(StoreMetadata),
}

fn check(store: &SledRecordStore, target: &Model) -> Result<Compatibility, StorageError> {
    Ok(match store.read_metadata()? {
        Some(metadata) if metadata.version_hash == target.version_hash() => {
            Compatibility::Compatible(metadata)
        }
        Some(metadata) => Compatibility::Incompatible(metadata),
        None if store.is_empty() => Compatibility::Fresh,
        None => Compatibility::Unstamped,
    })
}

struct Transitions<'a> {
    path: &'a Path,
    state: MigrationState,
}

impl<'a> Transitions<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            state: MigrationState::Unchecked,
        }
    }

    fn to(&mut self, next: MigrationState) {
        let from = self.state;
        self.state = next;
        if next == MigrationState::Failed {
            error!(path = %self.path.display(), %from, to = %next, "Migration state changed");
        } else {
            info!(path = %self.path.display(), %from, to = %next, "Migration state changed");
        }
    }
}

fn open(descriptor: &MigrationDescriptor, journal: JournalMode) -> Result<SledRecordStore, StorageError> {
    let flush = match journal {
        JournalMode::Durable => descriptor.flush_every_ms,
        JournalMode::Relaxed => descriptor.flush_every_ms.map(|ms| ms.max(1) * 4),
    };
    SledRecordStore::open(&descriptor.store_path, flush)
}

fn stamp(store: &SledRecordStore, model: &Model, journal: JournalMode) -> Result<(), StorageError> {
    store.write_metadata(&StoreMetadata::for_model(model, journal))
}

/// Validate `records` against `model`, replace the store's contents with them and
/// stamp the model.
pub(super) fn rewrite_store(
    store: &SledRecordStore,
    records: Vec<Record>,
    model: &Model,
    journal: JournalMode,
) -> Result<(), StorageError> {
    for record in &records {
        let entity = model
            .find_entity(&record.entity)
            .ok_or_else(|| StorageError::Validation {
                entity: record.entity.clone(),
                reason: format!("entity is not part of model version {}", model.version),
            })?;
        entity.validate_record(record)?;
    }
    store.replace_all(records, &key_fields(model))?;
    stamp(store, model, journal)
}

/// Open without migration: compatible stores open, fresh stores are stamped.
fn plain_open(descriptor: &MigrationDescriptor) -> Result<SledRecordStore, StorageError> {
    let store = open(descriptor, descriptor.journal)?;
    match check(&store, &descriptor.target_model)? {
        Compatibility::Compatible(_) => Ok(store),
        Compatibility::Fresh => {
            stamp(&store, &descriptor.target_model, descriptor.journal)?;
            Ok(store)
        }
        Compatibility::Unstamped => Err(StorageError::UnknownSchema),
        Compatibility::Incompatible(metadata) => Err(StorageError::IncompatibleModel {
            expected: format!(
                "{} v{}",
                descriptor.target_model.name, descriptor.declared_version
            ),
            found: format!("{} v{}", metadata.model_name, metadata.model_version),
        }),
    }
}

fn source_model<'a>(history: &'a ModelHistory, metadata: &StoreMetadata) -> Result<&'a Model, MigrationError> {
    history
        .find_by_hash(&metadata.version_hash)
        .ok_or_else(|| MigrationError::UnknownSourceVersion(metadata.version_hash.clone()))
}

fn lightweight(
    store: SledRecordStore,
    compatibility: Compatibility,
    descriptor: &MigrationDescriptor,
) -> Result<SledRecordStore, MigrationError> {
    let metadata = match compatibility {
        Compatibility::Incompatible(metadata) => metadata,
        _ => {
            return Err(MigrationError::Incompatible {
                target: descriptor.declared_version,
                reason: "store holds records without model metadata".to_string(),
            })
        }
    };
    let source = source_model(&descriptor.history, &metadata)?;
    let mapping = infer(source, &descriptor.target_model)?;
    let records = store.scan_all()?;
    let migrated: Vec<Record> = records
        .iter()
        .filter_map(|r| mapping.migrate_record(r))
        .collect();
    debug!(
        from = source.version,
        to = descriptor.target_model.version,
        records = migrated.len(),
        "Applying inferred mapping"
    );
    rewrite_store(&store, migrated, &descriptor.target_model, descriptor.journal)?;
    Ok(store)
}

fn remove_and_reopen(
    store: SledRecordStore,
    descriptor: &MigrationDescriptor,
) -> Result<SledRecordStore, MigrationError> {
    drop(store);
    warn!(path = %descriptor.store_path.display(), "Removing incompatible store");
    SledRecordStore::destroy(&descriptor.store_path).map_err(|source| {
        MigrationError::RemoveFailed {
            path: descriptor.store_path.clone(),
            source,
        }
    })?;
    Ok(plain_open(descriptor)?)
}

fn progressive(
    store: SledRecordStore,
    compatibility: Compatibility,
    descriptor: &MigrationDescriptor,
    plan: &super::ProgressiveMigration,
) -> Result<SledRecordStore, MigrationError> {
    let metadata = match compatibility {
        Compatibility::Incompatible(metadata) => metadata,
        _ => {
            return Err(MigrationError::Incompatible {
                target: descriptor.declared_version,
                reason: "store holds records without model metadata".to_string(),
            })
        }
    };
    let source = source_model(&descriptor.history, &metadata)?;
    plan.run(&store, source, descriptor)?;
    drop(store);

    let reopened = open(descriptor, JournalMode::Relaxed)?;
    match check(&reopened, &descriptor.target_model)? {
        Compatibility::Compatible(_) => Ok(reopened),
        _ => Err(MigrationError::Incompatible {
            target: descriptor.declared_version,
            reason: "store is not at the target version after progressive migration"
                .to_string(),
        }),
    }
}

/// Bring the store at `descriptor.store_path` to the target model.
pub fn migrate(descriptor: &MigrationDescriptor) -> Result<MigrationOutcome, MigrationError> {
    let mut transitions = Transitions::new(&descriptor.store_path);
    let store = open(descriptor, descriptor.journal)?;

    let compatibility = check(&store, &descriptor.target_model)?;
    match compatibility {
        Compatibility::Compatible(_) | Compatibility::Fresh => {
            if matches!(compatibility, Compatibility::Fresh) {
                stamp(&store, &descriptor.target_model, descriptor.journal)?;
            }
            transitions.to(MigrationState::Compatible);
            return Ok(MigrationOutcome {
                store,
                state: MigrationState::Compatible,
                journal: descriptor.journal,
            });
        }
        Compatibility::Unstamped | Compatibility::Incompatible(_) => {
            transitions.to(MigrationState::NeedsMigration);
        }
    }

    info!(strategy = descriptor.strategy.name(), "Migrating store");
    let (result, journal) = match &descriptor.strategy {
        MigrationStrategy::Lightweight => (
            lightweight(store, compatibility, descriptor),
            descriptor.journal,
        ),
        MigrationStrategy::RemoveOnFailure => {
            (remove_and_reopen(store, descriptor), descriptor.journal)
        }
        MigrationStrategy::Progressive(plan) => (
            progressive(store, compatibility, descriptor, plan),
            JournalMode::Relaxed,
        ),
    };

    match result {
        Ok(store) => {
            transitions.to(MigrationState::Migrated);
            Ok(MigrationOutcome {
                store,
                state: MigrationState::Migrated,
                journal,
            })
        }
        Err(err) => {
            transitions.to(MigrationState::Failed);
            Err(err)
        }
    }
}

/// Describe a store's state relative to `history` without changing it.
pub fn inspect(path: &Path, history: &ModelHistory) -> Result<StoreStatus, MigrationError> {
    let target = history.target().map_err(|e| MigrationError::Incompatible {
        target: 0,
        reason: e.to_string(),
    })?;
    let mut status = StoreStatus {
        path: path.to_path_buf(),
        exists: path.exists(),
        metadata: None,
        stored_version: None,
        target_version: target.version,
        state: MigrationState::Compatible,
        record_count: 0,
    };
    if !status.exists {
        return Ok(status);
    }

    let store = SledRecordStore::open(path, None)?;
    status.record_count = store.record_count();
    status.state = match check(&store, target)? {
        Compatibility::Compatible(_) | Compatibility::Fresh => MigrationState::Compatible,
        Compatibility::Unstamped | Compatibility::Incompatible(_) => MigrationState::NeedsMigration,
    };
    status.metadata = store.read_metadata()?;
    status.stored_version = status
        .metadata
        .as_ref()
        .and_then(|m| history.find_by_hash(&m.version_hash))
        .map(|m| m.version);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDescription, EntityDescription};
    use crate::store::{CommitBatch, PutRecord};
    use tempfile::TempDir;

    fn v1() -> Model {
        Model::new("Library", 1).entity(
            EntityDescription::new("User")
                .primary_key("id")
                .attribute(AttributeDescription::text("id"))
                .attribute(AttributeDescription::text("name")),
        )
    }

    fn v2() -> Model {
        Model::new("Library", 2).entity(
            EntityDescription::new("User")
                .primary_key("id")
                .attribute(AttributeDescription::text("id"))
                .attribute(AttributeDescription::text("name"))
                .attribute(AttributeDescription::integer("age").optional()),
        )
    }

    fn seed_v1(path: &Path) {
        let store = SledRecordStore::open(path, None).unwrap();
        stamp(&store, &v1(), JournalMode::Durable).unwrap();
        let mut record = Record::new("User").with("id", "1").with("name", "A");
        record.object_id = Some(store.generate_id().unwrap());
        store
            .commit(&CommitBatch {
                puts: vec![PutRecord {
                    record,
                    key_field: Some("id".to_string()),
                }],
                ..Default::default()
            })
            .unwrap();
    }

    fn descriptor(path: PathBuf, strategy: MigrationStrategy) -> MigrationDescriptor {
        let history = ModelHistory::new("Library").version(v1()).version(v2());
        let target = history.target().unwrap().clone();
        MigrationDescriptor::new(path, history, target, strategy)
    }

    #[test]
    fn test_fresh_store_is_stamped_compatible() {
        let dir = TempDir::new().unwrap();
        let outcome = migrate(&descriptor(dir.path().join("s"), MigrationStrategy::Lightweight)).unwrap();
        assert_eq!(outcome.state, MigrationState::Compatible);
        assert_eq!(
            outcome.store.read_metadata().unwrap().unwrap().model_version,
            2
        );
    }

    #[test]
    fn test_lightweight_keeps_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s");
        seed_v1(&path);

        let outcome = migrate(&descriptor(path.clone(), MigrationStrategy::Lightweight)).unwrap();
        assert_eq!(outcome.state, MigrationState::Migrated);
        assert_eq!(outcome.store.scan_entity("User").unwrap().len(), 1);
        drop(outcome);

        let status = inspect(&path, &descriptor(path.clone(), MigrationStrategy::Lightweight).history).unwrap();
        assert_eq!(status.stored_version, Some(2));
        assert_eq!(status.state, MigrationState::Compatible);
    }

    #[test]
    fn test_remove_on_failure_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s");
        seed_v1(&path);

        let outcome = migrate(&descriptor(path, MigrationStrategy::RemoveOnFailure)).unwrap();
        assert_eq!(outcome.state, MigrationState::Migrated);
        assert!(outcome.store.is_empty());
    }

    #[test]
    fn test_unknown_source_version_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s");
        seed_v1(&path);

        let history = ModelHistory::new("Library").version(v2());
        let d = MigrationDescriptor::new(path, history, v2(), MigrationStrategy::Lightweight);
        assert!(matches!(
            migrate(&d),
            Err(MigrationError::UnknownSourceVersion(_))
        ));
    }
}
