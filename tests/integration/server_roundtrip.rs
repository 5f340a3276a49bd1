//! End-to-end tests: sync engines over HTTP against the reference server.
//!
//! Each test starts `taskdeck-server` in-process on an OS-assigned port and
//! drives one or more [`SyncEngine`]s through [`HttpTaskService`].

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Url;
use taskdeck::remote::{HttpTaskService, RemoteError, RemoteTaskService, Revisioned};
use taskdeck::store::InMemoryBackend;
use taskdeck::sync::{EngineOptions, SyncEngine, SyncError};
use taskdeck_proto::task::{Importance, TaskId, TaskRecord, all_approx_eq};
use taskdeck_server::server::{ApiState, start_server_with_state};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TOKEN: &str = "test-token";

type Engine = SyncEngine<Arc<Switchable>, Arc<InMemoryBackend>>;

/// HTTP service that can be cut off to simulate losing connectivity.
struct Switchable {
    inner: HttpTaskService,
    offline: AtomicBool,
}

impl Switchable {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Network("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl RemoteTaskService for Switchable {
    async fn list(&self, revision: u64) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        self.check()?;
        self.inner.list(revision).await
    }

    async fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.check()?;
        self.inner.create(record, revision).await
    }

    async fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.check()?;
        self.inner.update(record, revision).await
    }

    async fn delete(&self, id: &TaskId, revision: u64) -> Result<Revisioned<()>, RemoteError> {
        self.check()?;
        self.inner.delete(id, revision).await
    }

    async fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        self.check()?;
        self.inner.bulk_replace(records, revision).await
    }
}

async fn start() -> (Url, Arc<ApiState>) {
    let state = Arc::new(ApiState::new(Some(TOKEN.to_string())));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (Url::parse(&format!("http://{addr}")).unwrap(), state)
}

fn device(base: &Url, name: &str, token: &str) -> (Engine, Arc<Switchable>) {
    let remote = Arc::new(Switchable {
        inner: HttpTaskService::new(base.clone(), token, name, Duration::from_secs(5)).unwrap(),
        offline: AtomicBool::new(false),
    });
    let (engine, _events) = SyncEngine::new(
        Arc::clone(&remote),
        Arc::new(InMemoryBackend::new()),
        EngineOptions {
            device_id: name.to_string(),
            ..EngineOptions::default()
        },
    );
    (engine, remote)
}

fn texts(engine: &Engine) -> Vec<String> {
    let mut texts: Vec<String> = engine.items().into_iter().map(|r| r.text).collect();
    texts.sort();
    texts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_changes_reach_other_device() {
    let (base, state) = start().await;
    let (laptop, _) = device(&base, "laptop", TOKEN);
    let (phone, _) = device(&base, "phone", TOKEN);
    laptop.load().await.unwrap();
    phone.load().await.unwrap();

    let added = laptop
        .add(TaskRecord::new("water plants").with_importance(Importance::High))
        .await
        .unwrap();
    assert_eq!(state.store.revision(), 1);
    assert_eq!(laptop.revision(), 1);

    phone.load().await.unwrap();
    let seen = phone.get(&added.id).unwrap();
    assert_eq!(seen.importance, Importance::High);
    assert_eq!(seen.last_updated_by.as_deref(), Some("laptop"));

    phone.set_done(&added.id, true).await.unwrap();
    laptop.load().await.unwrap();
    assert!(laptop.get(&added.id).unwrap().is_done);
    assert!(!laptop.is_dirty());
    assert!(!phone.is_dirty());
}

#[tokio::test]
async fn offline_device_converges_after_synchronize() {
    let (base, _state) = start().await;
    let (laptop, _) = device(&base, "laptop", TOKEN);
    let (phone, phone_link) = device(&base, "phone", TOKEN);

    laptop.add(TaskRecord::new("shared")).await.unwrap();
    phone.load().await.unwrap();

    phone_link.set_offline(true);
    let offline = phone.add(TaskRecord::new("written offline")).await;
    assert!(matches!(offline, Err(SyncError::Remote(RemoteError::Network(_)))));
    let shared = phone.items()[0].id.clone();
    assert!(phone.set_done(&shared, true).await.is_err());
    assert!(phone.is_dirty());
    assert!(phone.synchronize().await.is_err());

    phone_link.set_offline(false);
    phone.synchronize().await.unwrap();
    assert!(!phone.is_dirty());

    laptop.load().await.unwrap();
    assert_eq!(texts(&laptop), ["shared", "written offline"]);
    assert!(laptop.get(&shared).unwrap().is_done);
    assert!(all_approx_eq(&laptop.items(), &phone.items()));
    assert_eq!(laptop.revision(), phone.revision());
}

#[tokio::test]
async fn stale_single_write_is_rejected_then_synchronized() {
    let (base, _state) = start().await;
    let (laptop, _) = device(&base, "laptop", TOKEN);
    let (phone, _) = device(&base, "phone", TOKEN);

    let record = laptop.add(TaskRecord::new("draft")).await.unwrap();
    phone.load().await.unwrap();
    phone.add(TaskRecord::new("from phone")).await.unwrap();

    // The laptop still believes the list is at revision 1.
    let mut edited = laptop.get(&record.id).unwrap();
    edited.text = "final".to_string();
    let err = laptop.update(edited).await.unwrap_err();
    assert_eq!(err, SyncError::Remote(RemoteError::HttpStatus(400)));
    assert!(laptop.is_dirty());
    assert_eq!(laptop.get(&record.id).unwrap().text, "final");

    laptop.synchronize().await.unwrap();
    assert!(!laptop.is_dirty());
    phone.load().await.unwrap();
    assert_eq!(texts(&phone), ["final"]);
}

#[tokio::test]
async fn wrong_token_is_reported_as_401() {
    let (base, state) = start().await;
    let (intruder, _) = device(&base, "intruder", "guess");

    let err = intruder.load().await.unwrap_err();
    assert_eq!(err, SyncError::Remote(RemoteError::HttpStatus(401)));
    assert!(intruder.is_dirty());
    assert_eq!(state.store.revision(), 0);
}
