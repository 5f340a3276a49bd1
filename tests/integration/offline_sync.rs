//! Integration tests for offline-first synchronization.
//!
//! Drives [`SyncEngine`] through the public API against in-process server
//! doubles: offline add followed by a bulk sync, delete racing a stale
//! list, duplicate adds, revision tracking, and several devices sharing one
//! server.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use taskdeck::remote::{InMemoryTaskService, Op, RemoteError, RemoteTaskService, Revisioned};
use taskdeck::store::InMemoryBackend;
use taskdeck::sync::{EngineOptions, SyncEngine, SyncError, SyncEvent, SyncOutcome};
use taskdeck_proto::task::{TaskId, TaskRecord, all_approx_eq};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

type Engine<R> = SyncEngine<R, Arc<InMemoryBackend>>;

fn options(device: &str) -> EngineOptions {
    EngineOptions {
        device_id: device.to_string(),
        request_timeout: Duration::from_secs(2),
        ..EngineOptions::default()
    }
}

/// Engine for `device` on a shared in-memory server.
fn device(
    server: &Arc<InMemoryTaskService>,
    name: &str,
) -> (Engine<Arc<InMemoryTaskService>>, mpsc::Receiver<SyncEvent>) {
    SyncEngine::new(
        Arc::clone(server),
        Arc::new(InMemoryBackend::new()),
        options(name),
    )
}

fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn texts<R: RemoteTaskService>(engine: &Engine<R>) -> Vec<String> {
    let mut texts: Vec<String> = engine.items().into_iter().map(|r| r.text).collect();
    texts.sort();
    texts
}

/// Server double that stamps its own `updated_at` on bulk replace and
/// can report an out-of-date revision on list.
struct StampingServer {
    inner: InMemoryTaskService,
    stamp: chrono::DateTime<Utc>,
    list_revision_override: Option<u64>,
}

impl StampingServer {
    fn new() -> Self {
        Self {
            inner: InMemoryTaskService::new(),
            stamp: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
            list_revision_override: None,
        }
    }
}

impl RemoteTaskService for StampingServer {
    async fn list(&self, revision: u64) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        let mut listed = self.inner.list(revision).await?;
        if let Some(claimed) = self.list_revision_override {
            listed.revision = Some(claimed);
        }
        Ok(listed)
    }

    async fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.inner.create(record, revision).await
    }

    async fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.inner.update(record, revision).await
    }

    async fn delete(&self, id: &TaskId, revision: u64) -> Result<Revisioned<()>, RemoteError> {
        self.inner.delete(id, revision).await
    }

    async fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        let stamped: Vec<TaskRecord> = records
            .iter()
            .cloned()
            .map(|mut r| {
                r.updated_at = Some(self.stamp);
                r
            })
            .collect();
        self.inner.bulk_replace(&stamped, revision).await
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_add_then_synchronize() {
    let server = StampingServer::new();
    server
        .inner
        .fail_next(Op::Create, RemoteError::Network("unreachable".into()));
    let stamp = server.stamp;
    let (engine, mut events) =
        SyncEngine::new(server, Arc::new(InMemoryBackend::new()), options("phone"));
    assert!(!engine.is_dirty());

    let err = engine.add(TaskRecord::new("buy milk")).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
    assert_eq!(engine.items().len(), 1);
    assert!(engine.is_dirty());

    let outcome = engine.synchronize().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Synchronized(_)));
    assert!(!engine.is_dirty());

    let items = engine.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text, "buy milk");
    assert_eq!(items[0].updated_at, Some(stamp));

    let seen = drain(&mut events);
    assert!(seen.contains(&SyncEvent::DirtyChanged(true)));
    assert!(seen.contains(&SyncEvent::DirtyChanged(false)));
    assert!(seen.iter().any(|e| matches!(
        e,
        SyncEvent::OperationFailed { op: Op::Create, .. }
    )));
}

#[tokio::test]
async fn delete_then_stale_list_restores_record() {
    let server = Arc::new(InMemoryTaskService::new());
    let a = TaskRecord::new("A");
    let b = TaskRecord::new("B");
    server.seed(vec![a.clone(), b.clone()]);

    let (engine, _events) = device(&server, "laptop");
    engine.load().await.unwrap();
    assert_eq!(texts(&engine), ["A", "B"]);

    engine.delete(&a.id).await.unwrap();
    assert_eq!(texts(&engine), ["B"]);
    assert!(!engine.is_dirty());

    // Another writer that never saw the delete puts A back.
    server.seed(vec![a.clone(), b.clone()]);
    engine.load().await.unwrap();
    assert_eq!(texts(&engine), ["A", "B"]);
}

#[tokio::test]
async fn duplicate_add_keeps_first_content() {
    let server = Arc::new(InMemoryTaskService::new());
    let (engine, _events) = device(&server, "laptop");

    let first = TaskRecord::new("original");
    engine.add(first.clone()).await.unwrap();

    let mut second = first.clone();
    second.text = "impostor".to_string();
    let err = engine.add(second).await.unwrap_err();
    assert_eq!(err, SyncError::Duplicate(first.id.clone()));

    assert_eq!(engine.items().len(), 1);
    assert_eq!(engine.get(&first.id).unwrap().text, "original");
    assert_eq!(server.call_count(Op::Create), 1);
}

#[tokio::test]
async fn reconcile_converges_to_server_keys() {
    let server = Arc::new(InMemoryTaskService::new());
    let (engine, _events) = device(&server, "laptop");
    engine.add(TaskRecord::new("local only")).await.unwrap();

    let shared = TaskRecord::new("shared").with_done(true);
    let fresh = TaskRecord::new("from elsewhere");
    server.seed(vec![shared.clone(), fresh.clone()]);

    let report = engine.load().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.inserted, 2);
    assert!(all_approx_eq(&engine.items(), &server.snapshot()));
}

#[tokio::test]
async fn revision_never_moves_backwards() {
    let mut server = StampingServer::new();
    server.list_revision_override = Some(1);
    let (engine, _events) =
        SyncEngine::new(server, Arc::new(InMemoryBackend::new()), options("tablet"));

    for text in ["one", "two", "three"] {
        engine.add(TaskRecord::new(text)).await.unwrap();
    }
    assert_eq!(engine.revision(), 3);

    // The list claims revision 1, which is older than what we know.
    engine.load().await.unwrap();
    assert_eq!(engine.revision(), 3);
}

#[tokio::test]
async fn failed_update_and_delete_survive_until_sync() {
    let server = Arc::new(InMemoryTaskService::new());
    let (engine, _events) = device(&server, "laptop");
    let keep = engine.add(TaskRecord::new("keep")).await.unwrap();
    let drop = engine.add(TaskRecord::new("drop")).await.unwrap();

    server.fail_next(Op::Update, RemoteError::HttpStatus(500));
    server.fail_next(Op::Delete, RemoteError::Decode("garbled".into()));
    assert!(engine.set_done(&keep.id, true).await.is_err());
    assert!(engine.delete(&drop.id).await.is_err());
    assert!(engine.is_dirty());
    assert!(engine.get(&keep.id).unwrap().is_done);
    assert!(engine.get(&drop.id).is_none());
    assert_eq!(server.snapshot().len(), 2);

    engine.synchronize().await.unwrap();
    assert!(!engine.is_dirty());
    let on_server = server.snapshot();
    assert_eq!(on_server.len(), 1);
    assert!(on_server[0].is_done);
    assert!(all_approx_eq(&engine.items(), &on_server));
}

#[tokio::test]
async fn failed_sync_stays_dirty() {
    let server = Arc::new(InMemoryTaskService::new());
    let (engine, _events) = device(&server, "laptop");
    server.fail_next(Op::Create, RemoteError::Network("down".into()));
    let _ = engine.add(TaskRecord::new("pending")).await;

    server.fail_next(Op::BulkReplace, RemoteError::HttpStatus(503));
    let err = engine.synchronize().await.unwrap_err();
    assert_eq!(err, SyncError::Remote(RemoteError::HttpStatus(503)));
    assert!(engine.is_dirty());
    assert_eq!(engine.items().len(), 1);
    assert!(engine.last_error().is_some());

    assert!(matches!(
        engine.synchronize().await.unwrap(),
        SyncOutcome::Synchronized(_)
    ));
    assert_eq!(engine.synchronize().await.unwrap(), SyncOutcome::UpToDate);
}

#[tokio::test]
async fn two_devices_share_one_server() {
    let server = Arc::new(InMemoryTaskService::new());
    let (laptop, _l) = device(&server, "laptop");
    let (phone, _p) = device(&server, "phone");

    laptop.load().await.unwrap();
    phone.load().await.unwrap();

    laptop.add(TaskRecord::new("from laptop")).await.unwrap();
    phone.load().await.unwrap();
    let seen = phone.items();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].last_updated_by.as_deref(), Some("laptop"));

    phone.set_done(&seen[0].id, true).await.unwrap();
    laptop.load().await.unwrap();
    let record = &laptop.items()[0];
    assert!(record.is_done);
    assert_eq!(record.last_updated_by.as_deref(), Some("phone"));
}

#[tokio::test]
async fn slow_server_times_out_as_network_error() {
    let server = Arc::new(InMemoryTaskService::new());
    server.set_latency(Some(Duration::from_millis(300)));
    let (engine, _events) = SyncEngine::new(
        Arc::clone(&server),
        Arc::new(InMemoryBackend::new()),
        EngineOptions {
            request_timeout: Duration::from_millis(50),
            ..options("laptop")
        },
    );

    let err = engine.add(TaskRecord::new("slow")).await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Network(_))));
    assert_eq!(engine.items().len(), 1);
    assert!(engine.is_dirty());
}
