//! Record Store
//!
//! The physical sled store, its model metadata, and the coordinator that commits
//! root changesets atomically and tells observers about them.

pub mod notify;
pub mod persistence;

pub use notify::{ChangeListener, ChangeNotifier, StoreChange};
pub use persistence::{CommitBatch, PutRecord, RemoveRecord, SledRecordStore};

use crate::context::ChangeSet;
use crate::error::StorageError;
use crate::fetch::RawFetch;
use crate::model::{EntityDescription, Model};
use crate::types::{ObjectId, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Write-ahead durability of commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Flush after every commit
    #[default]
    Durable,
    /// Rely on the background flusher
    Relaxed,
}

/// Model identity stamped into a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub model_name: String,
    pub model_version: u32,
    pub version_hash: String,
    #[serde(default)]
    pub journal: JournalMode,
    /// RFC 3339 time the store was stamped with this model
    #[serde(default)]
    pub stamped_at: Option<String>,
}

impl StoreMetadata {
    pub fn for_model(model: &Model, journal: JournalMode) -> Self {
        Self {
            model_name: model.name.clone(),
            model_version: model.version,
            version_hash: model.version_hash(),
            journal,
            stamped_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub fetches: u64,
    pub commits: u64,
}

/// Owns the opened store for the lifetime of a client.
pub struct Coordinator {
    store: SledRecordStore,
    model: Model,
    key_fields: HashMap<String, Option<String>>,
    journal: JournalMode,
    notifier: ChangeNotifier,
    fetches: AtomicU64,
    commits: AtomicU64,
}

impl Coordinator {
    pub fn new(store: SledRecordStore, model: Model, journal: JournalMode) -> Self {
        let key_fields = key_fields(&model);
        info!(
            path = %store.path().display(),
            model = %model.name,
            version = model.version,
            ?journal,
            "Store coordinator ready"
        );
        Self {
            store,
            model,
            key_fields,
            journal,
            notifier: ChangeNotifier::new(),
            fetches: AtomicU64::new(0),
            commits: AtomicU64::new(0),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn journal(&self) -> JournalMode {
        self.journal
    }

    fn entity(&self, name: &str) -> Result<&EntityDescription, StorageError> {
        self.model
            .find_entity(name)
            .ok_or_else(|| StorageError::Validation {
                entity: name.to_string(),
                reason: "entity is not part of the model".to_string(),
            })
    }

    pub fn fetch(&self, fetch: &RawFetch) -> Result<Vec<Record>, StorageError> {
        let entity = self.entity(&fetch.entity)?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let records = self.store.fetch(fetch, entity.primary_key.as_deref())?;
        debug!(entity = %fetch.entity, count = records.len(), "Fetched records");
        Ok(records)
    }

    pub fn next_object_id(&self) -> Result<ObjectId, StorageError> {
        self.store.generate_id()
    }

    pub fn validate(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        for record in changes.upserts() {
            self.entity(&record.entity)?.validate_record(record)?;
        }
        Ok(())
    }

    /// Commit a root changeset in one transaction, flushing when durable.
    pub fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.validate(changes)?;

        let key_field = |entity: &str| self.key_fields.get(entity).cloned().flatten();
        let batch = CommitBatch {
            removes: changes
                .deletes()
                .map(|(entity, object_id)| RemoveRecord {
                    entity: entity.clone(),
                    object_id: *object_id,
                    key_field: key_field(entity),
                })
                .collect(),
            puts: changes
                .upserts()
                .map(|record| PutRecord {
                    record: record.clone(),
                    key_field: key_field(&record.entity),
                })
                .collect(),
        };
        self.store.commit(&batch)?;
        if self.journal == JournalMode::Durable {
            self.store.flush()?;
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(
            removes = batch.removes.len(),
            puts = batch.puts.len(),
            "Committed changeset"
        );
        Ok(())
    }

    pub fn register(&self, listener: &Arc<ChangeListener>) {
        self.notifier.register(listener);
    }

    pub fn publish(&self, entities: BTreeSet<String>) {
        self.notifier.publish(entities);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            fetches: self.fetches.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
        }
    }
}

/// Primary-key field per entity name
pub fn key_fields(model: &Model) -> HashMap<String, Option<String>> {
    model
        .entities
        .iter()
        .map(|e| (e.name.clone(), e.primary_key.clone()))
        .collect()
}
