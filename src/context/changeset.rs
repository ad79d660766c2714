//! Pending changes staged in a context

use crate::fetch::RawFetch;
use crate::types::{ObjectId, Record};
use std::collections::{BTreeMap, BTreeSet};

pub type RecordKey = (String, ObjectId);

/// Inserts, updates and deletes staged in one context, keyed by `(entity, object_id)`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    upserts: BTreeMap<RecordKey, Record>,
    /// Keys created in this changeset that no ancestor has seen yet
    inserted: BTreeSet<RecordKey>,
    deletes: BTreeSet<RecordKey>,
}

fn key_of(record: &Record) -> Option<RecordKey> {
    record
        .object_id
        .map(|object_id| (record.entity.clone(), object_id))
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    pub fn clear(&mut self) {
        self.upserts.clear();
        self.inserted.clear();
        self.deletes.clear();
    }

    /// Stage a newly created record. Records without an object id are ignored.
    pub fn insert(&mut self, record: Record) {
        let Some(key) = key_of(&record) else {
            return;
        };
        self.deletes.remove(&key);
        self.inserted.insert(key.clone());
        self.upserts.insert(key, record);
    }

    pub fn update(&mut self, record: Record) {
        let Some(key) = key_of(&record) else {
            return;
        };
        self.upserts.insert(key, record);
    }

    pub fn delete(&mut self, entity: &str, object_id: ObjectId) {
        let key = (entity.to_string(), object_id);
        self.upserts.remove(&key);
        if !self.inserted.remove(&key) {
            self.deletes.insert(key);
        }
    }

    /// Promote every staged change into `parent`.
    pub fn merge_into(&self, parent: &mut ChangeSet) {
        for (entity, object_id) in &self.deletes {
            parent.delete(entity, *object_id);
        }
        for (key, record) in &self.upserts {
            if self.inserted.contains(key) {
                parent.insert(record.clone());
            } else {
                parent.update(record.clone());
            }
        }
    }

    pub fn upserts(&self) -> impl Iterator<Item = &Record> {
        self.upserts.values()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &RecordKey> {
        self.deletes.iter()
    }

    pub fn touched_entities(&self) -> BTreeSet<String> {
        self.upserts
            .keys()
            .chain(self.deletes.iter())
            .map(|(entity, _)| entity.clone())
            .collect()
    }

    pub fn touches(&self, entity: &str) -> bool {
        self.upserts
            .keys()
            .chain(self.deletes.iter())
            .any(|(e, _)| e == entity)
    }

    /// Apply this changeset on top of `records` already matching `fetch`.
    ///
    /// The result is unsorted and unwindowed.
    pub fn overlay(&self, mut records: Vec<Record>, fetch: &RawFetch) -> Vec<Record> {
        if !self.touches(&fetch.entity) {
            return records;
        }
        records.retain(|record| match key_of(record) {
            Some(key) => !self.deletes.contains(&key) && !self.upserts.contains_key(&key),
            None => true,
        });
        records.extend(
            self.upserts
                .values()
                .filter(|r| r.entity == fetch.entity && fetch.predicate.matches(r))
                .cloned(),
        );
        records
    }
}
