//! The synchronization engine.
//!
//! All engine state (the local store, the unconfirmed ids, the stale bit
//! and the last error) sits behind one `parking_lot` mutex that is never
//! held across an `.await`. Remote calls are the only suspension points,
//! so every local mutation is visible before its remote call starts.
//!
//! # Dirty tracking
//!
//! Each optimistic mutation stamps its record id with a fresh generation in
//! the unconfirmed map. A server confirmation clears the id only if the
//! generation still matches, so a slow reply for an older edit never hides
//! a newer one. The stale bit records a failed `list`. The engine is dirty
//! while either is set:
//!
//! ```text
//! dirty = stale || !unconfirmed.is_empty()
//! ```
//!
//! A dropped (cancelled) operation future leaves its id unconfirmed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskdeck_proto::task::{TaskId, TaskRecord};
use tokio::sync::mpsc;

use super::reconcile::{ReconcileReport, reconcile};
use super::revision::RevisionTracker;
use super::{SyncError, SyncEvent, SyncOutcome};
use crate::remote::http::DEFAULT_TIMEOUT;
use crate::remote::{Op, RemoteError, RemoteTaskService, Revisioned};
use crate::store::{LocalStore, Persistence, StoreError};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Identifier written into `last_updated_by` on every local write.
    pub device_id: String,
    /// Upper bound for each remote call.
    pub request_timeout: Duration,
    /// Capacity of the [`SyncEvent`] channel.
    pub event_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            device_id: "taskdeck".to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Sync bookkeeping that can outlive the process.
///
/// The CLI saves it next to the task file so an offline change made by one
/// invocation is still pending in the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Last known server revision.
    pub revision: u64,
    /// Whether the last list fetch failed.
    pub stale: bool,
    /// Ids with local changes the server has not confirmed.
    pub unconfirmed: Vec<TaskId>,
}

#[derive(Debug, Default)]
struct EngineState {
    store: LocalStore,
    /// Record id → generation of its latest unconfirmed mutation.
    unconfirmed: HashMap<TaskId, u64>,
    next_generation: u64,
    stale: bool,
    last_error: Option<String>,
    /// Set once memory holds the disk snapshot or a server list. From then
    /// on memory is newer than disk and is never overwritten from it.
    populated: bool,
    /// Ids removed locally before population; their disk copies are stale.
    removed_early: HashSet<TaskId>,
}

impl EngineState {
    fn is_dirty(&self) -> bool {
        self.stale || !self.unconfirmed.is_empty()
    }

    /// Marks `id` as changed locally and returns the new generation.
    fn mark(&mut self, id: &TaskId) -> u64 {
        self.next_generation += 1;
        self.unconfirmed.insert(id.clone(), self.next_generation);
        self.next_generation
    }

    /// Fills in records read from disk underneath the in-memory ones.
    /// Ids already in memory, or deleted before this call, keep their
    /// memory state.
    fn populate(&mut self, disk: LocalStore) -> usize {
        let mut added = 0;
        for record in disk.fetch_all() {
            if !self.removed_early.contains(&record.id) && self.store.add(record) {
                added += 1;
            }
        }
        self.removed_early.clear();
        self.populated = true;
        added
    }

    /// Clears `id` if `generation` is still its latest mutation.
    fn confirm(&mut self, id: &TaskId, generation: u64) -> bool {
        if self.unconfirmed.get(id) == Some(&generation) {
            self.unconfirmed.remove(id);
            true
        } else {
            false
        }
    }
}

/// Offline-first task list synchronizer.
///
/// Generic over the server (`R`) and the local persistence backend (`P`).
/// Share it behind an `Arc` to drive it from several tasks.
pub struct SyncEngine<R, P> {
    remote: R,
    persistence: P,
    state: Mutex<EngineState>,
    revision: RevisionTracker,
    options: EngineOptions,
    events: mpsc::Sender<SyncEvent>,
    /// Serializes snapshot writes so the newest state lands last.
    flush_lock: tokio::sync::Mutex<()>,
}

impl<R: RemoteTaskService, P: Persistence> SyncEngine<R, P> {
    /// Creates an engine with an empty local store.
    ///
    /// Returns the engine and the receiving end of its event channel.
    #[must_use]
    pub fn new(remote: R, persistence: P, options: EngineOptions) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(options.event_buffer.max(1));
        let engine = Self {
            remote,
            persistence,
            state: Mutex::new(EngineState::default()),
            revision: RevisionTracker::default(),
            options,
            events: tx,
            flush_lock: tokio::sync::Mutex::new(()),
        };
        (engine, rx)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// All local records in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<TaskRecord> {
        self.state.lock().store.fetch_all()
    }

    /// The local record with `id`.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.state.lock().store.get(id).cloned()
    }

    /// Whether local state may diverge from the server.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().is_dirty()
    }

    /// Last known server revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.current()
    }

    /// Message of the most recent failure, cleared once the engine is clean.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Device identifier stamped on local writes.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.options.device_id
    }

    /// Current sync bookkeeping.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        let state = self.state.lock();
        let mut unconfirmed: Vec<TaskId> = state.unconfirmed.keys().cloned().collect();
        unconfirmed.sort();
        SyncState {
            revision: self.revision.current(),
            stale: state.stale,
            unconfirmed,
        }
    }

    /// Merges bookkeeping saved by an earlier session.
    pub fn restore(&self, saved: SyncState) {
        self.revision.observe(Some(saved.revision));
        self.with_state(|s| {
            s.stale |= saved.stale;
            for id in &saved.unconfirmed {
                s.mark(id);
            }
        });
        tracing::debug!(
            revision = saved.revision,
            unconfirmed = saved.unconfirmed.len(),
            "sync state restored"
        );
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Populates from the local snapshot on first use, then reconciles
    /// against the server list.
    ///
    /// The snapshot is read only until the engine has been populated once;
    /// after that the in-memory records are authoritative, even when an
    /// earlier write to disk failed. A local read failure is reported as
    /// [`SyncEvent::LocalLoadFailed`]. Unconfirmed records survive the
    /// reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the list cannot be fetched; the
    /// engine is then dirty and keeps its local records.
    pub async fn load(&self) -> Result<ReconcileReport, SyncError> {
        if !self.state.lock().populated {
            let mut local = LocalStore::new();
            match local.reload(&self.persistence).await {
                Ok(count) => {
                    let added = self.with_state(|s| s.populate(local));
                    tracing::info!(count, added, "local task list loaded");
                }
                Err(e) => self.emit(SyncEvent::LocalLoadFailed {
                    reason: e.to_string(),
                }),
            }
        }

        let server = match self
            .call(Op::List, None, self.remote.list(self.revision.current()))
            .await
        {
            Ok(server) => server,
            Err(e) => {
                self.with_state(|s| s.stale = true);
                return Err(e.into());
            }
        };

        let report = self.with_state(|s| {
            let protected: HashSet<TaskId> = s.unconfirmed.keys().cloned().collect();
            let report = reconcile(&mut s.store, server, &protected);
            s.stale = false;
            s.populated = true;
            s.removed_early.clear();
            report
        });
        self.emit(SyncEvent::Reconciled(report));
        self.flush().await;
        Ok(report)
    }

    /// Adds a new record locally, then creates it on the server.
    ///
    /// Returns the record as stored locally afterwards: the server's
    /// canonical copy on success.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if the text is blank (nothing changes).
    /// - [`SyncError::Duplicate`] if the id exists locally (nothing changes).
    /// - [`SyncError::Remote`] if the server call fails; the record stays
    ///   and the engine is dirty.
    pub async fn add(&self, mut record: TaskRecord) -> Result<TaskRecord, SyncError> {
        record.validate()?;
        record.last_updated_by = Some(self.options.device_id.clone());
        let id = record.id.clone();

        let generation = self.with_state(|s| s.store.add(record.clone()).then(|| s.mark(&id)));
        let Some(generation) = generation else {
            return Err(SyncError::Duplicate(id));
        };
        tracing::info!(id = %id, "task added locally");
        self.flush().await;

        let canonical = self
            .call(
                Op::Create,
                Some(&id),
                self.remote.create(&record, self.revision.current()),
            )
            .await?;
        let accepted = self.accept(&id, generation, canonical);
        self.flush().await;
        Ok(accepted)
    }

    /// Replaces a record locally (inserting it if absent), then on the
    /// server. Stamps `updated_at` and `last_updated_by`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if the text is blank (nothing changes).
    /// - [`SyncError::Remote`] if the server call fails; the change stays
    ///   and the engine is dirty.
    pub async fn update(&self, mut record: TaskRecord) -> Result<TaskRecord, SyncError> {
        record.validate()?;
        record.touch(Utc::now());
        record.last_updated_by = Some(self.options.device_id.clone());
        let id = record.id.clone();

        let generation = self.with_state(|s| {
            s.store.update(record.clone());
            s.mark(&id)
        });
        tracing::info!(id = %id, "task updated locally");
        self.flush().await;

        let canonical = self
            .call(
                Op::Update,
                Some(&id),
                self.remote.update(&record, self.revision.current()),
            )
            .await?;
        let accepted = self.accept(&id, generation, canonical);
        self.flush().await;
        Ok(accepted)
    }

    /// Marks a record done or not done through [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no local record has `id`, or any
    /// error of [`update`](Self::update).
    pub async fn set_done(&self, id: &TaskId, done: bool) -> Result<TaskRecord, SyncError> {
        let record = self.get(id).ok_or_else(|| SyncError::NotFound(id.clone()))?;
        self.update(record.with_done(done)).await
    }

    /// Removes a record locally, then on the server. Returns the removed
    /// record.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if no local record has `id`; the server is
    ///   not contacted.
    /// - [`SyncError::Remote`] if the server call fails; the local removal
    ///   stands and the engine is dirty.
    pub async fn delete(&self, id: &TaskId) -> Result<TaskRecord, SyncError> {
        let removed = self.with_state(|s| {
            let removed = s.store.remove(id)?;
            if !s.populated {
                s.removed_early.insert(id.clone());
            }
            Some((removed, s.mark(id)))
        });
        let Some((removed, generation)) = removed else {
            return Err(SyncError::NotFound(id.clone()));
        };
        tracing::info!(id = %id, "task removed locally");
        self.flush().await;

        self.call(
            Op::Delete,
            Some(id),
            self.remote.delete(id, self.revision.current()),
        )
        .await?;
        self.with_state(|s| s.confirm(id, generation));
        Ok(removed)
    }

    /// Pushes the full local list if anything is dirty, then reconciles
    /// against the server's answer.
    ///
    /// Ids changed locally while the request was in flight stay
    /// unconfirmed and are protected from the reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the bulk replace fails; the engine
    /// stays dirty.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        let pending = {
            let state = self.state.lock();
            state
                .is_dirty()
                .then(|| (state.unconfirmed.clone(), state.store.fetch_all()))
        };
        let Some((captured, records)) = pending else {
            tracing::debug!("nothing to synchronize");
            return Ok(SyncOutcome::UpToDate);
        };
        tracing::info!(
            count = records.len(),
            unconfirmed = captured.len(),
            "synchronizing full list"
        );

        let server = self
            .call(
                Op::BulkReplace,
                None,
                self.remote.bulk_replace(&records, self.revision.current()),
            )
            .await?;

        let report = self.with_state(|s| {
            let protected: HashSet<TaskId> = s
                .unconfirmed
                .iter()
                .filter(|&(id, generation)| captured.get(id) != Some(generation))
                .map(|(id, _)| id.clone())
                .collect();
            let report = reconcile(&mut s.store, server, &protected);
            s.unconfirmed.retain(|id, _| protected.contains(id));
            s.stale = false;
            s.populated = true;
            s.removed_early.clear();
            report
        });
        self.emit(SyncEvent::Reconciled(report));
        self.flush().await;
        Ok(SyncOutcome::Synchronized(report))
    }

    /// Writes the local snapshot through the persistence backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.state.lock().store.clone();
        snapshot.persist(&self.persistence).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Runs one remote call under the request timeout, tracking the
    /// revision and reporting the outcome.
    async fn call<T>(
        &self,
        op: Op,
        id: Option<&TaskId>,
        request: impl Future<Output = Result<Revisioned<T>, RemoteError>>,
    ) -> Result<T, RemoteError> {
        self.emit(SyncEvent::OperationStarted {
            op,
            id: id.cloned(),
        });
        let timeout = self.options.request_timeout;
        let result = tokio::time::timeout(timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Network(format!(
                    "{op} timed out after {}ms",
                    timeout.as_millis()
                )))
            });

        match result {
            Ok(response) => {
                let revision = self.revision.observe(response.revision);
                tracing::debug!(%op, id = ?id.map(TaskId::as_str), revision, "remote call succeeded");
                self.emit(SyncEvent::OperationSucceeded {
                    op,
                    id: id.cloned(),
                    revision,
                });
                Ok(response.value)
            }
            Err(error) => {
                tracing::warn!(
                    %op,
                    id = ?id.map(TaskId::as_str),
                    error = %error,
                    "remote call failed, keeping local state"
                );
                self.with_state(|s| s.last_error = Some(error.to_string()));
                self.emit(SyncEvent::OperationFailed {
                    op,
                    id: id.cloned(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Applies a server-confirmed record unless a newer local change to the
    /// same id superseded it. Returns the record as now stored locally.
    fn accept(&self, sent_id: &TaskId, generation: u64, mut canonical: TaskRecord) -> TaskRecord {
        self.with_state(|s| {
            if !s.confirm(sent_id, generation) {
                tracing::debug!(id = %sent_id, "newer local change pending, server copy not applied");
                return s.store.get(sent_id).cloned().unwrap_or(canonical);
            }
            if canonical.category.is_none() {
                canonical.category = s.store.get(sent_id).and_then(|r| r.category);
            }
            if canonical.id != *sent_id {
                tracing::info!(local = %sent_id, server = %canonical.id, "server assigned a new id");
                s.store.remove(sent_id);
            }
            s.store.update(canonical.clone());
            canonical
        })
    }

    /// Runs `f` under the state lock and reports dirty-flag transitions.
    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let (out, was_dirty, dirty) = {
            let mut state = self.state.lock();
            let was_dirty = state.is_dirty();
            let out = f(&mut state);
            let dirty = state.is_dirty();
            if was_dirty && !dirty {
                state.last_error = None;
            }
            (out, was_dirty, dirty)
        };
        if was_dirty != dirty {
            tracing::info!(dirty, "dirty flag changed");
            self.emit(SyncEvent::DirtyChanged(dirty));
        }
        out
    }

    /// Saves the snapshot, downgrading failure to a warning event.
    async fn flush(&self) {
        if let Err(e) = self.persist().await {
            self.emit(SyncEvent::PersistFailed {
                reason: e.to_string(),
            });
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Best-effort: a lagging or absent UI must not stall sync.
        let _ = self.events.try_send(event);
    }
}
