//! Integration tests for model migration on client construction

use super::test_utils::{config_in, library_history, open_library, open_with, User};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tierstore::migration::inspect;
use tierstore::{
    AttributeDescription, Client, ConversionError, EntityDescription, FetchRequest, InitError,
    MigrationDelegate, MigrationError, MigrationProgress, MigrationState, MigrationStrategy, Model,
    ProgressiveMigration, Record, ResourceBundle, Storable, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct Member {
    id: String,
    full_name: String,
    age: Option<i64>,
}

impl Storable for Member {
    fn entity_name() -> &'static str {
        "User"
    }

    fn primary_key_field() -> Option<&'static str> {
        Some("id")
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        let mut record = tierstore::storable::base_record::<Self>(existing)
            .with("id", self.id.as_str())
            .with("full_name", self.full_name.as_str());
        record.set("age", self.age);
        record
    }

    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            id: record
                .text("id")
                .ok_or_else(|| ConversionError::missing_field("User", "id"))?
                .to_string(),
            full_name: record
                .text("full_name")
                .ok_or_else(|| ConversionError::missing_field("User", "full_name"))?
                .to_string(),
            age: record.integer("age"),
        })
    }

    fn primary_value(&self) -> Option<Value> {
        Some(Value::from(self.id.as_str()))
    }
}

fn user_entity() -> EntityDescription {
    EntityDescription::new("User")
        .primary_key("id")
        .attribute(AttributeDescription::text("id"))
}

fn note_entity() -> EntityDescription {
    EntityDescription::new("Note").attribute(AttributeDescription::text("body"))
}

/// v2: optional age added
fn library_v2() -> Model {
    Model::new("Library", 2)
        .entity(
            user_entity()
                .attribute(AttributeDescription::text("name"))
                .attribute(AttributeDescription::integer("age").optional()),
        )
        .entity(note_entity())
}

/// v3: name renamed to full_name
fn library_v3() -> Model {
    Model::new("Library", 3)
        .entity(
            user_entity()
                .attribute(AttributeDescription::text("full_name").renamed_from("name"))
                .attribute(AttributeDescription::integer("age").optional()),
        )
        .entity(note_entity())
}

fn seed_v1(dir: &TempDir) {
    let client = open_library(dir);
    client
        .insert(vec![User::new("1", "Ada"), User::new("2", "Grace")])
        .wait()
        .unwrap();
}

fn members(client: &Client) -> Vec<Member> {
    client
        .query(FetchRequest::<Member>::all().sorted_by(tierstore::SortDescriptor::ascending("id")))
        .wait()
        .unwrap()
}

#[test]
fn test_lightweight_adds_optional_and_renames() {
    let dir = TempDir::new().unwrap();
    seed_v1(&dir);

    let history = library_history().version(library_v3());
    let client = open_with(&dir, history, MigrationStrategy::Lightweight);
    assert_eq!(client.migration_state(), MigrationState::Migrated);
    assert_eq!(client.model().version, 3);

    let found = members(&client);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].full_name, "Ada");
    assert_eq!(found[0].age, None);

    let outcome = client
        .upsert(vec![Member {
            id: "1".to_string(),
            full_name: "Ada Lovelace".to_string(),
            age: Some(36),
        }])
        .wait()
        .unwrap();
    assert_eq!(outcome.updated.len(), 1);
}

#[test]
fn test_lightweight_fails_on_kind_change() {
    let dir = TempDir::new().unwrap();
    seed_v1(&dir);

    let changed = Model::new("Library", 2)
        .entity(user_entity().attribute(AttributeDescription::integer("name")))
        .entity(note_entity());
    let history = library_history().version(changed);
    let result = Client::builder("Library")
        .bundle(ResourceBundle::in_memory().with_model(history))
        .config(config_in(dir.path()))
        .open();

    assert!(matches!(
        result,
        Err(InitError::Migration(MigrationError::CannotInferMapping { .. }))
    ));
}

#[test]
fn test_remove_on_failure_starts_empty() {
    let dir = TempDir::new().unwrap();
    seed_v1(&dir);

    let changed = Model::new("Library", 2)
        .entity(user_entity().attribute(AttributeDescription::integer("name")))
        .entity(note_entity());
    let history = library_history().version(changed);
    let client = open_with(&dir, history, MigrationStrategy::RemoveOnFailure);

    assert_eq!(client.migration_state(), MigrationState::Migrated);
    let records = client
        .query_records("User", tierstore::RawFetch::default())
        .wait()
        .unwrap();
    assert!(records.is_empty());
}

#[derive(Default)]
struct RecordingDelegate {
    events: Mutex<Vec<String>>,
    steps: Mutex<Vec<MigrationProgress>>,
}

impl MigrationDelegate for RecordingDelegate {
    fn on_start(&self, from_version: u32, to_version: u32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {}->{}", from_version, to_version));
    }

    fn on_progress(&self, progress: &MigrationProgress) {
        self.steps.lock().unwrap().push(progress.clone());
    }

    fn on_finish(&self, to_version: u32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish {}", to_version));
    }
}

#[test]
fn test_progressive_walks_every_version() {
    let dir = TempDir::new().unwrap();
    seed_v1(&dir);

    let delegate = Arc::new(RecordingDelegate::default());
    let plan = ProgressiveMigration::new()
        .with_delegate(delegate.clone())
        .step(2, 3, |record: &Record| {
            if record.entity != "User" {
                return Ok(Some(record.clone()));
            }
            let name = record.text("name").ok_or("missing name")?.to_uppercase();
            let mut migrated = Record::new("User").with("id", record.get("id").clone());
            migrated.object_id = record.object_id;
            migrated.set("full_name", name);
            Ok(Some(migrated))
        });
    let history = library_history().version(library_v2()).version(library_v3());
    let client = open_with(&dir, history.clone(), MigrationStrategy::Progressive(plan));

    assert_eq!(client.migration_state(), MigrationState::Migrated);
    assert_eq!(
        *delegate.events.lock().unwrap(),
        vec!["start 1->3".to_string(), "finish 3".to_string()]
    );
    let steps = delegate.steps.lock().unwrap().clone();
    assert_eq!(steps.len(), 2);
    assert_eq!((steps[0].from_version, steps[0].to_version), (1, 2));
    assert_eq!((steps[1].from_version, steps[1].to_version), (2, 3));
    assert_eq!(steps[1].records_migrated, 2);

    let names: Vec<String> = members(&client).into_iter().map(|m| m.full_name).collect();
    assert_eq!(names, vec!["ADA", "GRACE"]);

    let path = client.store_path().to_path_buf();
    drop(client);
    let status = inspect(&path, &history).unwrap();
    assert_eq!(status.stored_version, Some(3));
    assert_eq!(status.state, MigrationState::Compatible);
}

#[test]
fn test_progressive_failing_step_is_fatal() {
    let dir = TempDir::new().unwrap();
    seed_v1(&dir);

    let plan = ProgressiveMigration::new().step(1, 2, |_: &Record| Err("refused".to_string()));
    let history = library_history().version(library_v2());
    let result = Client::builder("Library")
        .bundle(ResourceBundle::in_memory().with_model(history))
        .config(config_in(dir.path()))
        .strategy(MigrationStrategy::Progressive(plan))
        .open();

    assert!(matches!(
        result,
        Err(InitError::Migration(MigrationError::StepFailed { from: 1, to: 2, .. }))
    ));
}

#[test]
fn test_model_loaded_from_resource_directory() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(&config.resource_dir).unwrap();
    std::fs::write(
        config.resource_dir.join("Library.toml"),
        r#"
name = "Library"

[[versions]]
version = 1

[[versions.entities]]
name = "User"
primary_key = "id"
attributes = [
    { name = "id", kind = "text" },
    { name = "name", kind = "text" },
]
"#,
    )
    .unwrap();

    let client = Client::builder("Library").config(config).open().unwrap();
    assert_eq!(client.model().version, 1);
    assert_eq!(
        client.model().find_entity("User").and_then(|e| e.primary_key.as_deref()),
        Some("id")
    );
    client.insert(vec![User::new("1", "A")]).wait().unwrap();
}
