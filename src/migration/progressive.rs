//! Stepwise migration through every intermediate model version

use super::engine::rewrite_store;
use super::mapping::infer;
use super::MigrationDescriptor;
use crate::error::MigrationError;
use crate::model::Model;
use crate::store::{JournalMode, SledRecordStore};
use crate::types::Record;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Custom transform for one version step; `Ok(None)` drops the record.
pub type StepTransform = Arc<dyn Fn(&Record) -> Result<Option<Record>, String> + Send + Sync>;

/// Progress of one completed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    /// 1-based
    pub step: usize,
    pub total_steps: usize,
    pub from_version: u32,
    pub to_version: u32,
    pub records_migrated: usize,
}

/// Receives progressive migration reports, synchronously on the constructing thread.
pub trait MigrationDelegate: Send + Sync {
    fn on_start(&self, _from_version: u32, _to_version: u32) {}

    fn on_progress(&self, _progress: &MigrationProgress) {}

    fn on_finish(&self, _to_version: u32) {}
}

#[derive(Clone, Default)]
pub struct ProgressiveMigration {
    delegate: Option<Arc<dyn MigrationDelegate>>,
    steps: HashMap<(u32, u32), StepTransform>,
}

impl ProgressiveMigration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn MigrationDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replace the inferred mapping for `from → to` with `transform`.
    pub fn step<F>(mut self, from: u32, to: u32, transform: F) -> Self
    where
        F: Fn(&Record) -> Result<Option<Record>, String> + Send + Sync + 'static,
    {
        self.steps.insert((from, to), Arc::new(transform));
        self
    }

    fn transform_records(
        &self,
        from: &Model,
        to: &Model,
        records: &[Record],
    ) -> Result<Vec<Record>, MigrationError> {
        let step_failed = |reason: String| MigrationError::StepFailed {
            from: from.version,
            to: to.version,
            reason,
        };

        let mut migrated = Vec::with_capacity(records.len());
        if let Some(transform) = self.steps.get(&(from.version, to.version)) {
            for record in records {
                if let Some(record) = transform(record).map_err(step_failed)? {
                    migrated.push(record);
                }
            }
        } else {
            let mapping = infer(from, to)?;
            migrated.extend(records.iter().filter_map(|r| mapping.migrate_record(r)));
        }
        Ok(migrated)
    }

    /// Walk `source → ... → target`, stamping each intermediate version.
    pub(super) fn run(
        &self,
        store: &SledRecordStore,
        source: &Model,
        descriptor: &MigrationDescriptor,
    ) -> Result<(), MigrationError> {
        let target = &descriptor.target_model;
        if source.version >= target.version {
            return Err(MigrationError::Incompatible {
                target: target.version,
                reason: format!(
                    "stored version {} is not older than the target version",
                    source.version
                ),
            });
        }

        let path = descriptor.history.path_between(source.version, target.version);
        if path.last().map(|m| m.version) != Some(target.version) {
            return Err(MigrationError::Incompatible {
                target: target.version,
                reason: "target version is not part of the model history".to_string(),
            });
        }

        if let Some(delegate) = &self.delegate {
            delegate.on_start(source.version, target.version);
        }

        let total_steps = path.len();
        let mut previous = source;
        for (index, next) in path.into_iter().enumerate() {
            let records = store.scan_all()?;
            let migrated = self.transform_records(previous, next, &records)?;
            let records_migrated = migrated.len();
            rewrite_store(store, migrated, next, JournalMode::Relaxed).map_err(|err| {
                MigrationError::StepFailed {
                    from: previous.version,
                    to: next.version,
                    reason: err.to_string(),
                }
            })?;

            let progress = MigrationProgress {
                step: index + 1,
                total_steps,
                from_version: previous.version,
                to_version: next.version,
                records_migrated,
            };
            info!(
                step = progress.step,
                total_steps,
                from = progress.from_version,
                to = progress.to_version,
                records = records_migrated,
                "Progressive migration step complete"
            );
            if let Some(delegate) = &self.delegate {
                delegate.on_progress(&progress);
            }
            previous = next;
        }

        if let Some(delegate) = &self.delegate {
            delegate.on_finish(target.version);
        }
        Ok(())
    }
}

impl fmt::Debug for ProgressiveMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<_> = self.steps.keys().collect();
        steps.sort();
        f.debug_struct("ProgressiveMigration")
            .field("delegate", &self.delegate.is_some())
            .field("steps", &steps)
            .finish()
    }
}
