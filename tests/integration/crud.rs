//! Integration tests for CRUD operations and reconciliation

use super::test_utils::{open_library, open_with, Note, Stranger, User};
use tempfile::TempDir;
use tierstore::{
    ApiError, AttributeDescription, ConfigurationError, ConversionError, EntityDescription,
    FetchRequest, MigrationState, MigrationStrategy, Model, ModelHistory, Predicate, Record,
    SortDescriptor, Storable, Value,
};

fn all_users(client: &tierstore::Client) -> Vec<User> {
    client
        .query(FetchRequest::<User>::all().sorted_by(SortDescriptor::ascending("id")))
        .wait()
        .unwrap()
}

#[test]
fn test_user_lifecycle_scenario() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    assert_eq!(client.migration_state(), MigrationState::Compatible);

    let inserted = client.insert(vec![User::new("1", "A")]).wait().unwrap();
    assert_eq!(inserted, vec![User::new("1", "A")]);

    let skipped = client.insert(vec![User::new("1", "B")]).wait().unwrap();
    assert!(skipped.is_empty());
    assert_eq!(all_users(&client), vec![User::new("1", "A")]);

    let updated = client.update(vec![User::new("1", "B")]).wait().unwrap();
    assert_eq!(updated, vec![User::new("1", "B")]);
    assert_eq!(all_users(&client), vec![User::new("1", "B")]);

    client.delete(vec![User::new("1", "B")]).wait().unwrap();
    assert!(all_users(&client).is_empty());
}

#[test]
fn test_second_insert_of_same_batch_is_empty() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    let batch: Vec<User> = (0..5).map(|i| User::new(&i.to_string(), "x")).collect();

    assert_eq!(client.insert(batch.clone()).wait().unwrap().len(), 5);
    assert!(client.insert(batch).wait().unwrap().is_empty());
    assert_eq!(all_users(&client).len(), 5);
}

#[test]
fn test_duplicate_keys_within_one_insert_batch() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let inserted = client
        .insert(vec![User::new("1", "first"), User::new("1", "second")])
        .wait()
        .unwrap();
    assert_eq!(inserted, vec![User::new("1", "first")]);
    assert_eq!(all_users(&client), vec![User::new("1", "first")]);
}

#[test]
fn test_upsert_twice() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    let batch = vec![User::new("1", "A"), User::new("2", "B")];

    let first = client.upsert(batch.clone()).wait().unwrap();
    assert!(first.updated.is_empty());
    assert_eq!(first.inserted, batch);

    let second = client.upsert(batch.clone()).wait().unwrap();
    assert_eq!(second.updated, batch);
    assert!(second.inserted.is_empty());
    assert_eq!(client.stats().commits, 2);
}

#[test]
fn test_upsert_with_repeated_key_updates_staged_insert() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let outcome = client
        .upsert(vec![User::new("1", "A"), User::new("1", "B")])
        .wait()
        .unwrap();
    assert_eq!(outcome.inserted, vec![User::new("1", "A")]);
    assert_eq!(outcome.updated, vec![User::new("1", "B")]);
    assert_eq!(all_users(&client), vec![User::new("1", "B")]);
}

#[test]
fn test_delete_of_inserted_objects_then_query_by_key_is_empty() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    client.insert(vec![User::new("keep", "K")]).wait().unwrap();

    let created = client
        .insert(vec![User::new("1", "A"), User::new("2", "B")])
        .wait()
        .unwrap();
    client.delete(created).wait().unwrap();

    let by_key = client
        .query(FetchRequest::<User>::filter(Predicate::one_of("id", ["1", "2"])))
        .wait()
        .unwrap();
    assert!(by_key.is_empty());
    assert_eq!(all_users(&client), vec![User::new("keep", "K")]);
}

#[test]
fn test_update_of_absent_objects_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    client.insert(vec![User::new("1", "A")]).wait().unwrap();
    let commits = client.stats().commits;

    let updated = client.update(vec![User::new("9", "Z")]).wait().unwrap();
    assert!(updated.is_empty());
    assert_eq!(client.stats().commits, commits);
    assert_eq!(all_users(&client), vec![User::new("1", "A")]);
}

#[test]
fn test_reconciliation_issues_one_lookup_per_call() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    let batch: Vec<User> = (0..25).map(|i| User::new(&i.to_string(), "x")).collect();

    let before = client.stats().fetches;
    client.insert(batch.clone()).wait().unwrap();
    assert_eq!(client.stats().fetches - before, 1);

    let before = client.stats().fetches;
    client.upsert(batch).wait().unwrap();
    assert_eq!(client.stats().fetches - before, 1);
}

#[test]
fn test_read_after_write_sees_the_write() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    for i in 0..20 {
        client
            .insert(vec![User::new(&i.to_string(), "x")])
            .wait()
            .unwrap();
        assert_eq!(all_users(&client).len(), i + 1);
    }
}

#[tokio::test]
async fn test_handles_are_awaitable() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let inserted = client.insert(vec![User::new("1", "A")]).await.unwrap();
    assert_eq!(inserted.len(), 1);
    let users = client.query(FetchRequest::<User>::all()).await.unwrap();
    assert_eq!(users, vec![User::new("1", "A")]);
}

#[test]
fn test_keyless_entity_always_inserts() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    let note = Note {
        body: "hello".to_string(),
    };

    client.insert(vec![note.clone()]).wait().unwrap();
    client.insert(vec![note.clone()]).wait().unwrap();
    let notes = client.query(FetchRequest::<Note>::all()).wait().unwrap();
    assert_eq!(notes, vec![note.clone(), note]);
}

#[test]
fn test_unknown_entity_fails_without_touching_store() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let result = client.insert(vec![Stranger]).wait();
    assert!(matches!(
        result,
        Err(ApiError::Configuration(ConfigurationError::UnknownEntity(_)))
    ));
    assert_eq!(client.stats().fetches, 0);
    assert!(client.observe(FetchRequest::<Stranger>::all()).is_err());
}

#[test]
fn test_paging_and_sorting() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    let batch: Vec<User> = ["d", "b", "a", "c"]
        .iter()
        .enumerate()
        .map(|(i, name)| User::new(&i.to_string(), name))
        .collect();
    client.insert(batch).wait().unwrap();

    let page = client
        .query(
            FetchRequest::<User>::all()
                .sorted_by(SortDescriptor::descending("name"))
                .offset(1)
                .limit(2),
        )
        .wait()
        .unwrap();
    let names: Vec<_> = page.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["c", "b"]);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let client = open_library(&dir);
        client.insert(vec![User::new("1", "A")]).wait().unwrap();
    }
    let client = open_library(&dir);
    assert_eq!(client.migration_state(), MigrationState::Compatible);
    assert_eq!(all_users(&client), vec![User::new("1", "A")]);
}

/// Stored as a `User`, but refuses to convert a name of "boom"
#[derive(Debug, Clone, PartialEq)]
struct Fragile {
    id: String,
    name: String,
}

impl Storable for Fragile {
    fn entity_name() -> &'static str {
        "User"
    }

    fn primary_key_field() -> Option<&'static str> {
        Some("id")
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        assert_ne!(self.name, "boom", "unconvertible object");
        tierstore::storable::base_record::<Self>(existing)
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            id: record.text("id").unwrap_or_default().to_string(),
            name: record.text("name").unwrap_or_default().to_string(),
        })
    }

    fn primary_value(&self) -> Option<Value> {
        Some(Value::from(self.id.as_str()))
    }
}

#[test]
fn test_panicking_conversion_leaves_nothing_for_the_next_write() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let failed = client
        .insert(vec![
            Fragile {
                id: "1".to_string(),
                name: "A".to_string(),
            },
            Fragile {
                id: "2".to_string(),
                name: "boom".to_string(),
            },
        ])
        .wait();
    assert!(matches!(failed, Err(ApiError::Closed(_))));

    client.insert(vec![User::new("9", "Z")]).wait().unwrap();
    assert_eq!(all_users(&client), vec![User::new("9", "Z")]);
}

/// Numeric id in the domain, text key in the store
#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: i64,
    label: String,
}

impl Storable for Item {
    fn entity_name() -> &'static str {
        "Item"
    }

    fn primary_key_field() -> Option<&'static str> {
        Some("id")
    }

    fn to_record(&self, existing: Option<Record>) -> Record {
        tierstore::storable::base_record::<Self>(existing)
            .with("id", self.id.to_string())
            .with("label", self.label.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        let id = record
            .text("id")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ConversionError::missing_field("Item", "id"))?;
        Ok(Self {
            id,
            label: record.text("label").unwrap_or_default().to_string(),
        })
    }

    fn primary_value(&self) -> Option<Value> {
        Some(Value::Integer(self.id))
    }
}

fn catalog() -> ModelHistory {
    ModelHistory::new("Catalog").version(
        Model::new("Catalog", 1).entity(
            EntityDescription::new("Item")
                .primary_key("id")
                .attribute(AttributeDescription::text("id"))
                .attribute(AttributeDescription::text("label")),
        ),
    )
}

fn item(id: i64, label: &str) -> Item {
    Item {
        id,
        label: label.to_string(),
    }
}

#[test]
fn test_numeric_objects_reconcile_against_text_keys() {
    let dir = TempDir::new().unwrap();
    let client = open_with(&dir, catalog(), MigrationStrategy::Lightweight);

    assert_eq!(client.insert(vec![item(7, "a")]).wait().unwrap().len(), 1);
    assert!(client.insert(vec![item(7, "b")]).wait().unwrap().is_empty());

    let updated = client.update(vec![item(7, "c")]).wait().unwrap();
    assert_eq!(updated, vec![item(7, "c")]);

    let outcome = client.upsert(vec![item(7, "d"), item(8, "e")]).wait().unwrap();
    assert_eq!(outcome.updated, vec![item(7, "d")]);
    assert_eq!(outcome.inserted, vec![item(8, "e")]);

    client.delete(vec![item(7, "d")]).wait().unwrap();
    let remaining = client.query(FetchRequest::<Item>::all()).wait().unwrap();
    assert_eq!(remaining, vec![item(8, "e")]);
}
