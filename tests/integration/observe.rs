//! Integration tests for change observation

use super::test_utils::{open_library, Note, User};
use futures::StreamExt;
use std::sync::mpsc;
use std::time::Duration;
use tempfile::TempDir;
use tierstore::{FetchRequest, Predicate};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_initial_emission_then_one_per_commit() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);
    client.insert(vec![User::new("1", "A")]).wait().unwrap();

    let observable = client.observe(FetchRequest::<User>::all()).unwrap();
    let (tx, rx) = mpsc::channel();
    let _subscription = observable.subscribe(move |users: &[User]| {
        tx.send(users.len()).unwrap();
    });

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);

    client.insert(vec![User::new("2", "B")]).wait().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);

    client.update(vec![User::new("2", "C")]).wait().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
}

#[test]
fn test_unrelated_entity_commit_does_not_emit() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let observable = client.observe(FetchRequest::<User>::all()).unwrap();
    let (tx, rx) = mpsc::channel();
    let _subscription = observable.subscribe(move |users: &[User]| {
        tx.send(users.len()).unwrap();
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0);

    client
        .insert(vec![Note {
            body: "unrelated".to_string(),
        }])
        .wait()
        .unwrap();
    // Queries run on the read sequence, so any queued emission has been delivered by now.
    client.query(FetchRequest::<User>::all()).wait().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_cancelled_subscription_stops_emissions() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let observable = client.observe(FetchRequest::<User>::all()).unwrap();
    let (tx, rx) = mpsc::channel();
    let subscription = observable.subscribe(move |users: &[User]| {
        let _ = tx.send(users.len());
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0);
    assert!(subscription.is_active());
    assert_eq!(observable.subscriber_count(), 1);

    subscription.cancel();
    assert_eq!(observable.subscriber_count(), 0);

    client.insert(vec![User::new("1", "A")]).wait().unwrap();
    client.query(FetchRequest::<User>::all()).wait().unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_filtered_observation() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let observable = client
        .observe(FetchRequest::<User>::filter(Predicate::eq("name", "A")))
        .unwrap();
    let (tx, rx) = mpsc::channel();
    let _subscription = observable.subscribe(move |users: &[User]| {
        tx.send(users.to_vec()).unwrap();
    });
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    client
        .insert(vec![User::new("1", "A"), User::new("2", "B")])
        .wait()
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), vec![User::new("1", "A")]);
}

#[tokio::test]
async fn test_observation_stream() {
    let dir = TempDir::new().unwrap();
    let client = open_library(&dir);

    let observable = client.observe(FetchRequest::<User>::all()).unwrap();
    let mut stream = observable.stream();

    let initial = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert!(initial.is_empty());

    client.insert(vec![User::new("1", "A")]).await.unwrap();
    let next = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(next, vec![User::new("1", "A")]);

    drop(stream);
    assert_eq!(observable.subscriber_count(), 0);
}
