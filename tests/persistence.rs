// tests/persistence.rs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use wdl_bot::error::PersistenceError;
use wdl_bot::state::persist::{save_logged, save_once, spawn_periodic, FileSink, Slot, SnapshotSink};
use wdl_bot::state::{Snapshot, SCHEMA_VERSION};
use wdl_bot::{LoadSource, StatePaths, StateStore};

fn paths(dir: &tempfile::TempDir) -> StatePaths {
    StatePaths {
        primary: dir.path().join("bot_state.json"),
        backup: dir.path().join("backup/bot_state.json"),
    }
}

#[derive(Default)]
struct MockSink {
    calls: Mutex<Vec<(Slot, usize)>>,
}

#[async_trait]
impl SnapshotSink for MockSink {
    async fn store(&self, slot: Slot, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.calls.lock().push((slot, bytes.len()));
        Ok(())
    }
}

/// Fails the first `failures` writes, then accepts.
struct FlakySink {
    failures: usize,
    attempts: Mutex<usize>,
    written: Mutex<Vec<Vec<u8>>>,
}

impl FlakySink {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: Mutex::new(0),
            written: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SnapshotSink for FlakySink {
    async fn store(&self, _slot: Slot, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let mut attempts = self.attempts.lock();
        *attempts += 1;
        if *attempts <= self.failures {
            return Err(PersistenceError::Io {
                path: "state/bot_state.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.written.lock().push(bytes);
        Ok(())
    }
}

#[test]
fn missing_files_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (store, source) = StateStore::load(&paths(&dir));
    assert_eq!(source, LoadSource::Empty);
    assert_eq!(store.snapshot(), Snapshot::default());
}

#[tokio::test]
async fn corrupt_primary_falls_back_to_backup() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(&dir);

    let store = StateStore::default();
    store.update(|s| s.cooldown.replies_this_hour = 6);
    save_once(&store, &FileSink::new(p.clone()), Slot::Backup).await.unwrap();
    fs::write(&p.primary, b"{ not json").unwrap();

    let (loaded, source) = StateStore::load(&p);
    assert_eq!(source, LoadSource::Backup);
    assert_eq!(loaded.read(|s| s.cooldown.replies_this_hour), 6);
}

#[test]
fn both_corrupt_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(&dir);
    fs::create_dir_all(p.backup.parent().unwrap()).unwrap();
    fs::write(&p.primary, b"42").unwrap();
    fs::write(&p.backup, b"").unwrap();

    let (_, source) = StateStore::load(&p);
    assert_eq!(source, LoadSource::Empty);
}

#[test]
fn unknown_and_missing_fields_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let p = paths(&dir);
    fs::write(
        &p.primary,
        r#"{
            "future_field": {"anything": [1, 2, 3]},
            "reply_budgets": {"42": 2},
            "actors": {
                "42": {"id": "42", "name": "newbie", "joined_at": "2025-09-06T14:00:00Z", "mood": "happy"}
            }
        }"#,
    )
    .unwrap();

    let (store, source) = StateStore::load(&p);
    assert_eq!(source, LoadSource::Primary);
    store.read(|s| {
        assert_eq!(s.schema_version, SCHEMA_VERSION);
        assert_eq!(s.reply_count("42"), 2);
        let actor = &s.actors["42"];
        assert_eq!(actor.name, "newbie");
        assert_eq!(actor.total_message_count, 0);
        assert!(actor.suspicious.is_empty());
    });
}

#[tokio::test(start_paused = true)]
async fn periodic_primary_save_skips_unchanged_state() {
    let store = Arc::new(StateStore::default());
    let sink = Arc::new(MockSink::default());
    let task = spawn_periodic(store.clone(), sink.clone(), Slot::Primary, Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(sink.calls.lock().len(), 1);

    store.update(|s| s.cooldown.replies_this_hour = 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.calls.lock().len(), 2);

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn periodic_backup_always_writes() {
    let store = Arc::new(StateStore::default());
    let sink = Arc::new(MockSink::default());
    let task = spawn_periodic(store, sink.clone(), Slot::Backup, Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(35)).await;
    let calls = sink.calls.lock().clone();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(slot, len)| *slot == Slot::Backup && *len > 0));

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn failed_primary_save_is_retried_without_new_mutations() {
    let store = Arc::new(StateStore::default());
    store.update(|s| s.cooldown.replies_this_hour = 7);
    let sink = Arc::new(FlakySink::new(1));
    let task = spawn_periodic(store.clone(), sink.clone(), Slot::Primary, Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(55)).await;

    // Tick 10s fails, tick 20s succeeds, later ticks see an unchanged revision.
    assert_eq!(*sink.attempts.lock(), 2);
    let written = sink.written.lock();
    assert_eq!(written.len(), 1);
    let saved: Snapshot = serde_json::from_slice(&written[0]).unwrap();
    assert_eq!(saved.cooldown.replies_this_hour, 7);

    task.abort();
}

#[tokio::test]
async fn save_logged_reports_failure_and_keeps_going() {
    let store = StateStore::default();
    let sink = FlakySink::new(1);
    assert!(!save_logged(&store, &sink, Slot::Backup).await);
    assert!(save_logged(&store, &sink, Slot::Backup).await);
    assert_eq!(sink.written.lock().len(), 1);
}
