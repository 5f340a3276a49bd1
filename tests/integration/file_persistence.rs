//! Integration tests for on-disk persistence.
//!
//! Exercise [`FileBackend`] in both formats through the sync engine:
//! snapshots written after mutations, reload across engine instances,
//! migration of legacy files, and resilience to unreadable files.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::Arc;

use serde_json::Value;
use taskdeck::remote::{InMemoryTaskService, Op, RemoteError};
use taskdeck::store::{FileBackend, Persistence};
use taskdeck::sync::{EngineOptions, SyncEngine, SyncEvent, SyncState};
use taskdeck_proto::codec::FileFormat;
use taskdeck_proto::task::{Category, Importance, TaskId, TaskRecord};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Engine = SyncEngine<Arc<InMemoryTaskService>, FileBackend>;

fn engine(server: &Arc<InMemoryTaskService>, backend: FileBackend) -> (Engine, tokio::sync::mpsc::Receiver<SyncEvent>) {
    SyncEngine::new(
        Arc::clone(server),
        backend,
        EngineOptions {
            device_id: "desk".to_string(),
            ..EngineOptions::default()
        },
    )
}

fn unreachable_server() -> Arc<InMemoryTaskService> {
    let server = Arc::new(InMemoryTaskService::new());
    server.fail_next(Op::List, RemoteError::Network("offline".into()));
    server
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mutations_are_written_and_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    let server = Arc::new(InMemoryTaskService::new());

    let (first, _events) = engine(&server, FileBackend::from_path(&path));
    let kept = first
        .add(
            TaskRecord::new("file taxes")
                .with_importance(Importance::High)
                .with_category(Category::Work),
        )
        .await
        .unwrap();
    let gone = first.add(TaskRecord::new("temporary")).await.unwrap();
    first.delete(&gone.id).await.unwrap();
    drop(first);

    let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let array = on_disk.as_array().unwrap();
    assert_eq!(array.len(), 1);
    assert_eq!(array[0]["importance"], "high");
    assert_eq!(array[0]["category"], "work");
    assert_eq!(array[0]["lastUpdatedBy"], "desk");

    // The server drops the category; the local copy keeps it.
    let (second, _events) = engine(&server, FileBackend::from_path(&path));
    second.load().await.unwrap();
    let reloaded = second.get(&kept.id).unwrap();
    assert_eq!(reloaded.text, "file taxes");
    assert_eq!(reloaded.category, Some(Category::Work));
}

#[tokio::test]
async fn offline_start_shows_local_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.csv");
    let backend = FileBackend::from_path(&path);
    assert_eq!(backend.format(), FileFormat::Tabular);
    backend
        .save(&[TaskRecord::new("offline one"), TaskRecord::new("offline two")])
        .await
        .unwrap();

    let (engine, _events) = engine(&unreachable_server(), FileBackend::from_path(&path));
    assert!(engine.load().await.is_err());
    assert_eq!(engine.items().len(), 2);
    assert!(engine.is_dirty());
}

#[tokio::test]
async fn legacy_json_is_migrated_on_next_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    std::fs::write(
        &path,
        br#"[
  {"id":"legacy-1","text":"old style","importance":"important","isReady":true,
   "createdAt":"2024-03-01T10:00:00Z","deadline":"2024-03-05T18:30:00+02:00"}
]"#,
    )
    .unwrap();

    let backend = FileBackend::from_path(&path);
    let records = backend.load().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].importance, Importance::High);
    assert!(records[0].is_done);

    backend.save(&records).await.unwrap();
    let rewritten: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let object = &rewritten[0];
    assert_eq!(object["createdAt"], 1_709_287_200);
    assert_eq!(object["deadline"], 1_709_656_200);
    assert_eq!(object["isDone"], true);
    assert_eq!(object["importance"], "high");
    assert!(object.get("isReady").is_none());
}

#[tokio::test]
async fn reordered_tabular_columns_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.csv");
    std::fs::write(
        &path,
        "createdAt,text,isDone,id,color\n\
         1700000000,\"milk, eggs\",true,a,#00FF00\n\
         1700000100,plain,false,b,\n",
    )
    .unwrap();

    let records = FileBackend::from_path(&path).load().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, TaskId::from("a"));
    assert_eq!(records[0].text, "milk, eggs");
    assert!(records[0].is_done);
    assert_eq!(records[0].color.as_deref(), Some("#00FF00"));
    assert_eq!(records[1].color, None);
}

#[tokio::test]
async fn corrupt_file_is_reported_then_replaced_by_server_list() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let server = Arc::new(InMemoryTaskService::new());
    server.seed(vec![TaskRecord::new("from server")]);
    let (engine, mut events) = engine(&server, FileBackend::from_path(&path));
    engine.load().await.unwrap();
    assert_eq!(engine.items().len(), 1);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event, SyncEvent::LocalLoadFailed { .. });
    }
    assert!(saw_failure);

    // The reconcile rewrote the file with the server list.
    let records = FileBackend::from_path(&path).load().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text, "from server");
}

#[tokio::test]
async fn saved_sync_state_keeps_offline_changes_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.json");
    let server = Arc::new(InMemoryTaskService::new());

    // First run: the add never reaches the server.
    let (first, _events) = engine(&server, FileBackend::from_path(&path));
    server.fail_next(Op::Create, RemoteError::Network("offline".into()));
    let pending = first.add(TaskRecord::new("pending")).await.unwrap_err();
    assert!(matches!(pending, taskdeck::sync::SyncError::Remote(_)));
    let saved = serde_json::to_vec(&first.snapshot()).unwrap();
    drop(first);

    // Second run: restoring the state protects the record from pruning.
    let restored: SyncState = serde_json::from_slice(&saved).unwrap();
    assert_eq!(restored.unconfirmed.len(), 1);
    let (second, _events) = engine(&server, FileBackend::from_path(&path));
    second.restore(restored);
    second.load().await.unwrap();
    assert_eq!(second.items().len(), 1);
    assert!(second.is_dirty());

    second.synchronize().await.unwrap();
    assert!(!second.is_dirty());
    assert_eq!(server.snapshot()[0].text, "pending");
}
