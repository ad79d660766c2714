//! Migration Engine
//!
//! Runs once while a client is constructed, before any context exists. Checks the
//! stored model identity against the target model and, when they differ, recovers
//! with the strategy the client was built with.

pub mod engine;
pub mod mapping;
pub mod progressive;

pub use engine::{inspect, migrate, MigrationOutcome, StoreStatus};
pub use mapping::{infer, MappingModel};
pub use progressive::{MigrationDelegate, MigrationProgress, ProgressiveMigration, StepTransform};

use crate::model::{Model, ModelHistory};
use crate::store::JournalMode;
use std::fmt;
use std::path::PathBuf;

/// Migration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Unchecked,
    Compatible,
    NeedsMigration,
    Migrated,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MigrationState::Unchecked => "unchecked",
            MigrationState::Compatible => "compatible",
            MigrationState::NeedsMigration => "needs-migration",
            MigrationState::Migrated => "migrated",
            MigrationState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How an incompatible store is recovered
#[derive(Debug, Clone, Default)]
pub enum MigrationStrategy {
    /// Infer a mapping from the stored version straight to the target
    #[default]
    Lightweight,
    /// Discard the store and start empty
    RemoveOnFailure,
    /// Walk every intermediate version, reporting to an optional delegate
    Progressive(ProgressiveMigration),
}

impl MigrationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationStrategy::Lightweight => "lightweight",
            MigrationStrategy::RemoveOnFailure => "remove-on-failure",
            MigrationStrategy::Progressive(_) => "progressive",
        }
    }
}

/// Everything the engine needs; consumed by one run.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
    pub store_path: PathBuf,
    pub declared_version: u32,
    pub target_model: Model,
    pub history: ModelHistory,
    pub strategy: MigrationStrategy,
    pub journal: JournalMode,
    pub flush_every_ms: Option<u64>,
}

impl MigrationDescriptor {
    pub fn new(
        store_path: PathBuf,
        history: ModelHistory,
        target_model: Model,
        strategy: MigrationStrategy,
    ) -> Self {
        Self {
            store_path,
            declared_version: target_model.version,
            target_model,
            history,
            strategy,
            journal: JournalMode::default(),
            flush_every_ms: Some(500),
        }
    }

    pub fn journal(mut self, journal: JournalMode) -> Self {
        self.journal = journal;
        self
    }

    pub fn flush_every_ms(mut self, flush_every_ms: Option<u64>) -> Self {
        self.flush_every_ms = flush_every_ms;
        self
    }
}
