//! Scopes, the shared main/root contexts, and the commit cascade

use super::sequence::{OperationHandle, Sequence, SequenceHandle};
use super::{Context, ContextRole};
use crate::error::{ApiError, InitError, StorageError};
use crate::fetch::RawFetch;
use crate::store::Coordinator;
use crate::types::{ObjectId, Record};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One step of the commit cascade: save the named context into its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitStep {
    Write,
    Main,
    Root,
}

const CASCADE: [CommitStep; 3] = [CommitStep::Write, CommitStep::Main, CommitStep::Root];

/// Contexts shared by both sequences. Lock order is always `main` then `root`;
/// locks are only held briefly, never across a store commit.
pub struct SharedScopes {
    main: RwLock<Context>,
    root: RwLock<Context>,
    coordinator: Arc<Coordinator>,
}

impl SharedScopes {
    fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            main: RwLock::new(Context::new(ContextRole::Main)),
            root: RwLock::new(Context::new(ContextRole::Root)),
            coordinator,
        }
    }

    /// Fetch as seen from `own`: persisted records with root, main and own
    /// pending changes layered on top.
    fn fetch(&self, own: &Context, fetch: &RawFetch) -> Result<Vec<Record>, StorageError> {
        let main = self.main.read();
        let root = self.root.read();
        let layers = [&root.pending, &main.pending, &own.pending];

        if !layers.iter().any(|layer| layer.touches(&fetch.entity)) {
            return self.coordinator.fetch(fetch);
        }

        let mut records = self.coordinator.fetch(&fetch.unwindowed())?;
        for layer in layers {
            records = layer.overlay(records, fetch);
        }
        fetch.sort_records(&mut records);
        Ok(fetch.apply_window(records))
    }

    /// Save `write → main → root`, stopping at the first failure.
    ///
    /// Steps run against copies of main and root, so readers keep the previous view
    /// and no lock is held while the store commits and flushes. The shared contexts
    /// are cleared only after the store accepts the changes; on failure they are
    /// untouched and `write` is reset.
    fn save_cascade(&self, write: &mut Context) -> Result<(), StorageError> {
        if write.pending.is_empty() {
            return Ok(());
        }
        let touched = write.pending.touched_entities();

        let mut staged_main = self.main.read().pending.clone();
        let mut staged_root = self.root.read().pending.clone();

        for step in CASCADE {
            let saved = match step {
                CommitStep::Write => {
                    write.pending.merge_into(&mut staged_main);
                    Ok(())
                }
                CommitStep::Main => {
                    staged_main.merge_into(&mut staged_root);
                    staged_main.clear();
                    Ok(())
                }
                CommitStep::Root => self.coordinator.commit(&staged_root),
            };

            if let Err(err) = saved {
                warn!(?step, error = %err, "Commit cascade failed, discarding staged changes");
                write.reset();
                return Err(err);
            }
            debug!(?step, "Cascade step saved");
        }

        {
            let mut main = self.main.write();
            let mut root = self.root.write();
            main.reset();
            root.reset();
        }
        write.reset();

        info!(entities = ?touched, "Commit cascade complete");
        self.coordinator.publish(touched);
        Ok(())
    }
}

/// A context owned by a sequence worker
pub struct Scope {
    context: Context,
    shared: Arc<SharedScopes>,
}

impl Scope {
    fn new(role: ContextRole, shared: Arc<SharedScopes>) -> Self {
        Self {
            context: Context::new(role),
            shared,
        }
    }

    pub fn role(&self) -> ContextRole {
        self.context.role
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.shared.coordinator
    }

    pub fn has_pending(&self) -> bool {
        !self.context.pending.is_empty()
    }

    pub fn fetch(&self, fetch: &RawFetch) -> Result<Vec<Record>, StorageError> {
        self.shared.fetch(&self.context, fetch)
    }

    /// Stage a new record: defaults applied, fresh object id assigned.
    pub fn stage_insert(&mut self, mut record: Record) -> Result<Record, StorageError> {
        if let Some(entity) = self.shared.coordinator.model().find_entity(&record.entity) {
            entity.apply_defaults(&mut record);
        }
        record.object_id = Some(self.shared.coordinator.next_object_id()?);
        self.context.pending.insert(record.clone());
        Ok(record)
    }

    /// Stage an overwrite of an existing record, keeping its object id.
    pub fn stage_update(&mut self, record: Record) -> Result<Record, StorageError> {
        if record.object_id.is_none() {
            return Err(StorageError::Validation {
                entity: record.entity.clone(),
                reason: "cannot update a record without an object id".to_string(),
            });
        }
        self.context.pending.update(record.clone());
        Ok(record)
    }

    pub fn stage_delete(&mut self, entity: &str, object_id: ObjectId) {
        self.context.pending.delete(entity, object_id);
    }

    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.shared.save_cascade(&mut self.context)
    }

    pub fn reset(&mut self) {
        self.context.reset();
    }
}

/// The whole hierarchy, built eagerly once the store is open.
pub struct ContextHierarchy {
    shared: Arc<SharedScopes>,
    read: Sequence<Scope>,
    write: Sequence<Scope>,
}

impl ContextHierarchy {
    pub fn new(coordinator: Arc<Coordinator>) -> Result<Self, InitError> {
        let shared = Arc::new(SharedScopes::new(coordinator));
        let spawn = |role: ContextRole| {
            let label = role.label();
            Sequence::spawn(label, Scope::new(role, Arc::clone(&shared)))
                .map_err(|source| InitError::Sequence { label, source })
        };
        let read = spawn(ContextRole::Read)?;
        let write = spawn(ContextRole::Write)?;
        debug!("Context hierarchy constructed");
        Ok(Self {
            shared,
            read,
            write,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.shared.coordinator
    }

    pub fn read<R, F>(&self, work: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Scope) -> Result<R, ApiError> + Send + 'static,
    {
        self.read.submit(work)
    }

    pub fn read_handle(&self) -> SequenceHandle<Scope> {
        self.read.handle()
    }

    /// Run `work` on the write sequence. Anything it staged is discarded if it fails.
    pub fn write<R, F>(&self, work: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Scope) -> Result<R, ApiError> + Send + 'static,
    {
        self.write.submit(move |scope: &mut Scope| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| work(scope))) {
                Ok(result) => result,
                Err(payload) => {
                    warn!("Write unit panicked, resetting write context");
                    scope.reset();
                    panic::resume_unwind(payload);
                }
            };
            if result.is_err() && scope.has_pending() {
                debug!("Write failed before commit, resetting write context");
                scope.reset();
            }
            result
        })
    }
}
