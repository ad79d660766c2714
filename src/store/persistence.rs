//! Sled persistence for records, the primary-key index and store metadata

use crate::error::StorageError;
use crate::fetch::RawFetch;
use crate::store::StoreMetadata;
use crate::types::{ObjectId, Record, Value};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const TREE_RECORDS: &str = "records";
const TREE_KEYS: &str = "primary_keys";
const TREE_META: &str = "store_meta";
const META_KEY: &[u8] = b"metadata";
const SEPARATOR: u8 = 0;

/// One staged record write, with the entity's primary-key field
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub record: Record,
    pub key_field: Option<String>,
}

/// One staged record removal
#[derive(Debug, Clone)]
pub struct RemoveRecord {
    pub entity: String,
    pub object_id: ObjectId,
    pub key_field: Option<String>,
}

/// Records applied together in one sled transaction
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub removes: Vec<RemoveRecord>,
    pub puts: Vec<PutRecord>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.puts.is_empty()
    }
}

/// Sled-based record store
pub struct SledRecordStore {
    path: PathBuf,
    db: Db,
    records: Tree,
    keys: Tree,
    meta: Tree,
}

impl SledRecordStore {
    /// Open (or create) the store directory at `path`
    ///
    /// `flush_every_ms` drives sled's background flusher; `None` disables it.
    pub fn open<P: AsRef<Path>>(path: P, flush_every_ms: Option<u64>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = sled::Config::new()
            .path(&path)
            .flush_every_ms(flush_every_ms)
            .open()
            .map_err(|e| {
                StorageError::Engine(format!(
                    "Failed to open store at {}: {}",
                    path.display(),
                    e
                ))
            })?;
        let records = db.open_tree(TREE_RECORDS)?;
        let keys = db.open_tree(TREE_KEYS)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            path,
            db,
            records,
            keys,
            meta,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_metadata(&self) -> Result<Option<StoreMetadata>, StorageError> {
        let Some(raw) = self.meta.get(META_KEY)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    pub fn write_metadata(&self, metadata: &StoreMetadata) -> Result<(), StorageError> {
        let value = serde_json::to_vec(metadata).map_err(to_storage_data)?;
        self.meta.insert(META_KEY, value)?;
        self.flush()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn generate_id(&self) -> Result<ObjectId, StorageError> {
        Ok(ObjectId(self.db.generate_id()?))
    }

    pub fn get(&self, entity: &str, object_id: ObjectId) -> Result<Option<Record>, StorageError> {
        match self.records.get(record_key(entity, object_id))? {
            Some(raw) => Ok(Some(decode_record(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn lookup_key(&self, entity: &str, key: &Value) -> Result<Option<ObjectId>, StorageError> {
        let Some(index) = key.index_key() else {
            return Ok(None);
        };
        match self.keys.get(index_key(entity, &index))? {
            Some(raw) => Ok(Some(decode_object_id(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every record of `entity`, in object id order
    pub fn scan_entity(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        let mut out = Vec::new();
        for item in self.records.scan_prefix(entity_prefix(entity)) {
            let (_, value) = item?;
            out.push(decode_record(&value)?);
        }
        Ok(out)
    }

    /// Every record in the store
    pub fn scan_all(&self) -> Result<Vec<Record>, StorageError> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_, value) = item?;
            out.push(decode_record(&value)?);
        }
        Ok(out)
    }

    /// Evaluate a fetch natively: key-index lookup when the predicate is a pure
    /// key match, otherwise a prefix scan, then sort and window.
    pub fn fetch(&self, fetch: &RawFetch, key_field: Option<&str>) -> Result<Vec<Record>, StorageError> {
        let lookup = key_field.and_then(|field| fetch.predicate.key_lookup(field));
        let mut records = match lookup {
            Some(values) => {
                let mut found = Vec::with_capacity(values.len());
                let mut seen = std::collections::HashSet::new();
                for value in values {
                    if let Some(object_id) = self.lookup_key(&fetch.entity, value)? {
                        if seen.insert(object_id) {
                            if let Some(record) = self.get(&fetch.entity, object_id)? {
                                found.push(record);
                            }
                        }
                    }
                }
                found
            }
            None => self.scan_entity(&fetch.entity)?,
        };
        records.retain(|record| fetch.predicate.matches(record));
        fetch.sort_records(&mut records);
        Ok(fetch.apply_window(records))
    }

    /// Apply removals then writes atomically, maintaining the key index.
    pub fn commit(&self, batch: &CommitBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        (&self.records, &self.keys)
            .transaction(|(records, keys)| {
                for remove in &batch.removes {
                    remove_in_txn(records, keys, remove)?;
                }
                for put in &batch.puts {
                    put_in_txn(records, keys, put)?;
                }
                Ok(())
            })
            .map_err(from_txn)
    }

    /// Replace every record and rebuild the key index in one transaction.
    ///
    /// Used by migrations; object ids are preserved.
    pub fn replace_all(
        &self,
        records: Vec<Record>,
        key_fields: &HashMap<String, Option<String>>,
    ) -> Result<(), StorageError> {
        let old_record_keys: Vec<sled::IVec> = self
            .records
            .iter()
            .keys()
            .collect::<Result<_, _>>()?;
        let old_index_keys: Vec<sled::IVec> =
            self.keys.iter().keys().collect::<Result<_, _>>()?;
        let puts: Vec<PutRecord> = records
            .into_iter()
            .map(|record| PutRecord {
                key_field: key_fields.get(&record.entity).cloned().flatten(),
                record,
            })
            .collect();

        (&self.records, &self.keys)
            .transaction(|(tx_records, tx_keys)| {
                for key in &old_record_keys {
                    tx_records.remove(key)?;
                }
                for key in &old_index_keys {
                    tx_keys.remove(key)?;
                }
                for put in &puts {
                    put_in_txn(tx_records, tx_keys, put)?;
                }
                Ok(())
            })
            .map_err(from_txn)?;
        self.flush()
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Delete the store directory. The store must not be open.
    pub fn destroy(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}

type TxnResult<T> = Result<T, ConflictableTransactionError<StorageError>>;

fn remove_in_txn(records: &TransactionalTree, keys: &TransactionalTree, remove: &RemoveRecord) -> TxnResult<()> {
    let Some(old) = records.remove(record_key(&remove.entity, remove.object_id))? else {
        return Ok(());
    };
    let old = decode_record(&old).map_err(ConflictableTransactionError::Abort)?;
    if let Some(field) = &remove.key_field {
        if let Some(index) = old.get(field).index_key() {
            let full = index_key(&remove.entity, &index);
            if let Some(owner) = keys.get(&full)? {
                if decode_object_id(&owner).ok() == Some(remove.object_id) {
                    keys.remove(full)?;
                }
            }
        }
    }
    Ok(())
}

fn put_in_txn(records: &TransactionalTree, keys: &TransactionalTree, put: &PutRecord) -> TxnResult<()> {
    let record = &put.record;
    let object_id = record.object_id.ok_or_else(|| {
        ConflictableTransactionError::Abort(StorageError::Validation {
            entity: record.entity.clone(),
            reason: "record has no object id".to_string(),
        })
    })?;
    let rkey = record_key(&record.entity, object_id);

    if let Some(field) = &put.key_field {
        let old_index = match records.get(&rkey)? {
            Some(raw) => decode_record(&raw)
                .map_err(ConflictableTransactionError::Abort)?
                .get(field)
                .index_key(),
            None => None,
        };
        let new_index = record.get(field).index_key();
        if new_index != old_index {
            if let Some(old_index) = old_index {
                keys.remove(index_key(&record.entity, &old_index))?;
            }
            if let Some(new_index) = new_index {
                let full = index_key(&record.entity, &new_index);
                if let Some(owner) = keys.get(&full)? {
                    if decode_object_id(&owner).ok() != Some(object_id) {
                        return Err(ConflictableTransactionError::Abort(
                            StorageError::UniqueViolation {
                                entity: record.entity.clone(),
                                key: record.get(field).clone(),
                            },
                        ));
                    }
                }
                keys.insert(full, &object_id.to_be_bytes())?;
            }
        }
    }

    let value = bincode::serialize(record)
        .map_err(|e| ConflictableTransactionError::Abort(StorageError::Encoding(e.to_string())))?;
    records.insert(rkey, value)?;
    Ok(())
}

fn from_txn(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::from(e),
    }
}

fn entity_prefix(entity: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(entity.len() + 1);
    key.extend_from_slice(entity.as_bytes());
    key.push(SEPARATOR);
    key
}

fn record_key(entity: &str, object_id: ObjectId) -> Vec<u8> {
    let mut key = entity_prefix(entity);
    key.extend_from_slice(&object_id.to_be_bytes());
    key
}

fn index_key(entity: &str, value_key: &[u8]) -> Vec<u8> {
    let mut key = entity_prefix(entity);
    key.extend_from_slice(value_key);
    key
}

fn decode_record(raw: &[u8]) -> Result<Record, StorageError> {
    bincode::deserialize(raw)
        .map_err(|e| StorageError::Encoding(format!("Failed to deserialize record: {}", e)))
}

fn decode_object_id(raw: &[u8]) -> Result<ObjectId, StorageError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageError::Encoding("Malformed key index entry".to_string()))?;
    Ok(ObjectId(u64::from_be_bytes(bytes)))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::Encoding(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Predicate, SortDescriptor};
    use crate::store::JournalMode;
    use tempfile::TempDir;

    fn user(store: &SledRecordStore, id: &str, name: &str) -> PutRecord {
        let mut record = Record::new("User").with("id", id).with("name", name);
        record.object_id = Some(store.generate_id().unwrap());
        PutRecord {
            record,
            key_field: Some("id".to_string()),
        }
    }

    #[test]
    fn test_commit_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRecordStore::open(temp_dir.path().join("s"), Some(500)).unwrap();

        let put = user(&store, "1", "A");
        let object_id = put.record.object_id.unwrap();
        store
            .commit(&CommitBatch {
                puts: vec![put],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.lookup_key("User", &Value::from("1")).unwrap(), Some(object_id));
        let record = store.get("User", object_id).unwrap().unwrap();
        assert_eq!(record.text("name"), Some("A"));
    }

    #[test]
    fn test_duplicate_key_aborts_whole_batch() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRecordStore::open(temp_dir.path().join("s"), Some(500)).unwrap();

        let batch = CommitBatch {
            puts: vec![user(&store, "1", "A"), user(&store, "1", "B")],
            ..Default::default()
        };
        let err = store.commit(&batch).unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_then_reinsert_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRecordStore::open(temp_dir.path().join("s"), Some(500)).unwrap();

        let first = user(&store, "1", "A");
        let first_id = first.record.object_id.unwrap();
        store
            .commit(&CommitBatch {
                puts: vec![first],
                ..Default::default()
            })
            .unwrap();

        let second = user(&store, "1", "B");
        store
            .commit(&CommitBatch {
                removes: vec![RemoveRecord {
                    entity: "User".to_string(),
                    object_id: first_id,
                    key_field: Some("id".to_string()),
                }],
                puts: vec![second],
            })
            .unwrap();

        let all = store.scan_entity("User").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].text("name"), Some("B"));
    }

    #[test]
    fn test_fetch_sorts_and_pages() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRecordStore::open(temp_dir.path().join("s"), Some(500)).unwrap();
        let puts = vec![
            user(&store, "1", "c"),
            user(&store, "2", "a"),
            user(&store, "3", "b"),
        ];
        store
            .commit(&CommitBatch {
                puts,
                ..Default::default()
            })
            .unwrap();

        let fetch = RawFetch {
            sort: Some(SortDescriptor::ascending("name")),
            limit: 2,
            ..RawFetch::entity("User")
        };
        let names: Vec<String> = store
            .fetch(&fetch, Some("id"))
            .unwrap()
            .iter()
            .map(|r| r.text("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let keyed = RawFetch {
            predicate: Predicate::one_of("id", ["3", "1", "9"]),
            ..RawFetch::entity("User")
        };
        assert_eq!(store.fetch(&keyed, Some("id")).unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRecordStore::open(temp_dir.path().join("s"), Some(500)).unwrap();
        assert!(store.read_metadata().unwrap().is_none());

        let metadata = StoreMetadata {
            model_name: "Library".to_string(),
            model_version: 3,
            version_hash: "abc".to_string(),
            journal: JournalMode::Relaxed,
            stamped_at: None,
        };
        store.write_metadata(&metadata).unwrap();
        assert_eq!(store.read_metadata().unwrap(), Some(metadata));
    }
}
