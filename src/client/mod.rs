//! Persistence Client
//!
//! Generic CRUD over any [`Storable`] type. Construction resolves the model, runs
//! migration once and builds the context hierarchy; every operation afterwards is
//! queued on the read or write sequence and answered through an [`OperationHandle`].

pub mod observe;
pub mod reconcile;

pub use observe::{Observable, ObservationStream, Subscription};

use crate::config::{ConfigLoader, StoreConfig};
use crate::context::{ContextHierarchy, OperationHandle, Scope};
use crate::error::{ApiError, ConfigurationError, InitError};
use crate::fetch::{FetchRequest, RawFetch};
use crate::migration::{self, MigrationDescriptor, MigrationState, MigrationStrategy};
use crate::model::{Model, ResourceBundle};
use crate::storable::Storable;
use crate::store::{Coordinator, StoreStats};
use crate::types::{Record, Value};
use reconcile::reconcile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an upsert: which objects updated existing records and which were created
#[derive(Debug)]
pub struct UpsertOutcome<T> {
    pub updated: Vec<T>,
    pub inserted: Vec<T>,
}

impl<T> Default for UpsertOutcome<T> {
    fn default() -> Self {
        Self {
            updated: Vec::new(),
            inserted: Vec::new(),
        }
    }
}

/// Handle to one store opened against one model
pub struct Client {
    model: Model,
    store_path: PathBuf,
    migration: MigrationState,
    hierarchy: ContextHierarchy,
}

impl Client {
    /// Open `model_name` with the default bundle, configuration and lightweight migration.
    pub fn new(model_name: &str) -> Result<Self, InitError> {
        Self::builder(model_name).open()
    }

    pub fn builder(model_name: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            model_name: model_name.into(),
            bundle: None,
            strategy: MigrationStrategy::default(),
            config: None,
            data_dir: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Final state of the migration run during construction
    pub fn migration_state(&self) -> MigrationState {
        self.migration
    }

    pub fn stats(&self) -> StoreStats {
        self.hierarchy.coordinator().stats()
    }

    /// Check `T` against the model before any context is touched.
    fn entity_for<T: Storable>(&self) -> Result<(), ConfigurationError> {
        let name = T::entity_name();
        let entity = self
            .model
            .find_entity(name)
            .ok_or_else(|| ConfigurationError::UnknownEntity(name.to_string()))?;
        let reported = T::primary_key_field();
        if entity.primary_key.as_deref() != reported {
            return Err(ConfigurationError::PrimaryKeyMismatch {
                entity: name.to_string(),
                declared: entity.primary_key.clone(),
                reported: reported.map(str::to_string),
            });
        }
        Ok(())
    }

    pub fn query<T: Storable>(&self, request: FetchRequest<T>) -> OperationHandle<Vec<T>> {
        if let Err(err) = self.entity_for::<T>() {
            return OperationHandle::failed(err.into());
        }
        let fetch = request.to_raw();
        self.hierarchy.read(move |scope: &mut Scope| {
            let records = scope.fetch(&fetch)?;
            records
                .iter()
                .map(|record| T::from_record(record).map_err(ApiError::from))
                .collect()
        })
    }

    /// Insert objects whose key is not stored yet; the others are skipped.
    ///
    /// Resolves to the objects actually created.
    pub fn insert<T: Storable>(&self, objects: Vec<T>) -> OperationHandle<Vec<T>> {
        if let Err(err) = self.entity_for::<T>() {
            return OperationHandle::failed(err.into());
        }
        self.hierarchy.write(move |scope: &mut Scope| {
            let pairs = reconcile(scope, objects)?;
            let mut staged_keys: Vec<Value> = Vec::new();
            let mut created = Vec::new();
            for (object, existing) in pairs {
                if existing.is_some() || is_staged(&object, &staged_keys) {
                    debug!(entity = T::entity_name(), key = ?object.primary_value(), "Skipping insert of existing object");
                    continue;
                }
                if let Some(key) = object.primary_value() {
                    staged_keys.push(key);
                }
                scope.stage_insert(new_record(&object))?;
                created.push(object);
            }
            scope.commit()?;
            Ok(created)
        })
    }

    /// Overwrite stored records from matching objects; unmatched objects are skipped.
    ///
    /// Resolves to the objects actually updated.
    pub fn update<T: Storable>(&self, objects: Vec<T>) -> OperationHandle<Vec<T>> {
        if let Err(err) = self.entity_for::<T>() {
            return OperationHandle::failed(err.into());
        }
        self.hierarchy.write(move |scope: &mut Scope| {
            let pairs = reconcile(scope, objects)?;
            let mut updated = Vec::new();
            for (object, existing) in pairs {
                let Some(existing) = existing else {
                    debug!(entity = T::entity_name(), key = ?object.primary_value(), "Skipping update of unknown object");
                    continue;
                };
                scope.stage_update(overwrite(&object, existing))?;
                updated.push(object);
            }
            scope.commit()?;
            Ok(updated)
        })
    }

    /// Update matching objects and insert the rest, in one commit.
    pub fn upsert<T: Storable>(&self, objects: Vec<T>) -> OperationHandle<UpsertOutcome<T>> {
        if let Err(err) = self.entity_for::<T>() {
            return OperationHandle::failed(err.into());
        }
        self.hierarchy.write(move |scope: &mut Scope| {
            let pairs = reconcile(scope, objects)?;
            let mut staged: Vec<(Value, Record)> = Vec::new();
            let mut outcome = UpsertOutcome::default();
            for (object, existing) in pairs {
                if let Some(existing) = existing {
                    scope.stage_update(overwrite(&object, existing))?;
                    outcome.updated.push(object);
                    continue;
                }

                let earlier = staged
                    .iter_mut()
                    .find(|(key, _)| object.is_primary_value_equal(key));
                if let Some((_, record)) = earlier {
                    *record = scope.stage_update(overwrite(&object, record.clone()))?;
                    outcome.updated.push(object);
                    continue;
                }

                let record = scope.stage_insert(new_record(&object))?;
                if let Some(key) = object.primary_value() {
                    staged.push((key, record));
                }
                outcome.inserted.push(object);
            }
            scope.commit()?;
            Ok(outcome)
        })
    }

    /// Delete the records matching `objects`; unmatched objects are skipped.
    pub fn delete<T: Storable>(&self, objects: Vec<T>) -> OperationHandle<()> {
        if let Err(err) = self.entity_for::<T>() {
            return OperationHandle::failed(err.into());
        }
        self.hierarchy.write(move |scope: &mut Scope| {
            let pairs = reconcile(scope, objects)?;
            for (_, existing) in pairs {
                if let Some(object_id) = existing.and_then(|record| record.object_id) {
                    scope.stage_delete(T::entity_name(), object_id);
                }
            }
            scope.commit()?;
            Ok(())
        })
    }

    /// Observe `request`; subscribers get a fresh result after every commit touching `T`.
    pub fn observe<T: Storable>(&self, request: FetchRequest<T>) -> Result<Observable<T>, ApiError> {
        self.entity_for::<T>()?;
        Ok(Observable::new(
            request.to_raw(),
            self.hierarchy.read_handle(),
            self.hierarchy.coordinator(),
        ))
    }

    /// Untyped query, for tooling.
    pub fn query_records(&self, entity: &str, fetch: RawFetch) -> OperationHandle<Vec<Record>> {
        if self.model.find_entity(entity).is_none() {
            return OperationHandle::failed(ConfigurationError::UnknownEntity(entity.to_string()).into());
        }
        let fetch = RawFetch {
            entity: entity.to_string(),
            ..fetch
        };
        self.hierarchy
            .read(move |scope: &mut Scope| Ok(scope.fetch(&fetch)?))
    }
}

fn is_staged<T: Storable>(object: &T, staged_keys: &[Value]) -> bool {
    staged_keys.iter().any(|key| object.is_primary_value_equal(key))
}

fn new_record<T: Storable>(object: &T) -> Record {
    let mut record = object.to_record(None);
    record.entity = T::entity_name().to_string();
    record.object_id = None;
    record
}

fn overwrite<T: Storable>(object: &T, existing: Record) -> Record {
    let object_id = existing.object_id;
    let mut record = object.to_record(Some(existing));
    record.entity = T::entity_name().to_string();
    record.object_id = object_id;
    record
}

/// Configures and opens a [`Client`]
pub struct ClientBuilder {
    model_name: String,
    bundle: Option<ResourceBundle>,
    strategy: MigrationStrategy,
    config: Option<StoreConfig>,
    data_dir: Option<PathBuf>,
}

impl ClientBuilder {
    /// Where model histories are loaded from; defaults to the configured resource directory.
    pub fn bundle(mut self, bundle: ResourceBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn strategy(mut self, strategy: MigrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Use `config` instead of loading one from the configuration sources.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = Some(data_dir.as_ref().to_path_buf());
        self
    }

    /// Resolve the model, migrate the store and build the context hierarchy.
    pub fn open(self) -> Result<Client, InitError> {
        let mut config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => ConfigLoader::load(None)?,
        };
        if let Some(data_dir) = self.data_dir {
            config.data_dir = Some(data_dir);
        }

        let bundle = self
            .bundle
            .unwrap_or_else(|| ResourceBundle::directory(&config.resource_dir));
        let history = bundle.load(&self.model_name)?;
        let target = history.target()?.clone();
        let store_path = config.store_path(&self.model_name)?;
        info!(
            model = %self.model_name,
            version = target.version,
            path = %store_path.display(),
            strategy = self.strategy.name(),
            "Opening client"
        );

        let descriptor =
            MigrationDescriptor::new(store_path.clone(), history, target.clone(), self.strategy)
                .journal(config.journal)
                .flush_every_ms(config.flush_interval());
        let outcome = migration::migrate(&descriptor)?;

        let coordinator = Arc::new(Coordinator::new(outcome.store, target.clone(), outcome.journal));
        let hierarchy = ContextHierarchy::new(coordinator)?;

        Ok(Client {
            model: target,
            store_path,
            migration: outcome.state,
            hierarchy,
        })
    }
}
