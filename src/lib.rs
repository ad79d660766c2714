//! Tierstore: Layered-Context Local Object Store
//!
//! A generic persistence client over a local sled store. Domain types implement
//! [`Storable`]; the client reconciles them against stored records by primary key,
//! commits writes through a `write → main → root` context cascade, migrates the
//! store between model versions on open, and pushes query results to observers
//! after every relevant commit.

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod migration;
pub mod model;
pub mod storable;
pub mod store;
pub mod types;

pub use client::{Client, ClientBuilder, Observable, ObservationStream, Subscription, UpsertOutcome};
pub use context::OperationHandle;
pub use error::{ApiError, ConfigurationError, ConversionError, InitError, MigrationError, StorageError};
pub use fetch::{FetchRequest, Predicate, RawFetch, SortDescriptor};
pub use migration::{
    MigrationDelegate, MigrationProgress, MigrationState, MigrationStrategy, ProgressiveMigration,
};
pub use model::{AttributeDescription, AttributeKind, EntityDescription, Model, ModelHistory, ResourceBundle};
pub use storable::Storable;
pub use types::{ObjectId, Record, Value};
