//! In-process implementation of [`RemoteTaskService`].
//!
//! Behaves like the list server as far as the engine can tell: it keeps a
//! canonical list with its own revision counter, drops local-only metadata
//! on write, and can be told to fail the next call of a given kind. Several
//! engines may share one instance through an `Arc` to simulate devices.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use taskdeck_proto::task::{TaskId, TaskRecord};

use super::{Op, RemoteError, RemoteTaskService, Revisioned};

/// One call as seen by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Which operation was invoked.
    pub op: Op,
    /// Revision the caller claimed to know.
    pub revision: u64,
}

#[derive(Debug, Default)]
struct ServerState {
    records: Vec<TaskRecord>,
    revision: u64,
    failures: HashMap<Op, VecDeque<RemoteError>>,
    calls: Vec<Call>,
}

impl ServerState {
    fn position(&self, id: &TaskId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// In-memory list server.
#[derive(Debug, Default)]
pub struct InMemoryTaskService {
    state: Mutex<ServerState>,
    latency: Mutex<Option<Duration>>,
    strict_revisions: bool,
}

impl InMemoryTaskService {
    /// Creates an empty service at revision 0 that accepts any revision.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that rejects single-element writes carrying a
    /// stale revision with HTTP 400, like the real server.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict_revisions: true,
            ..Self::default()
        }
    }

    /// Replaces the server list directly and bumps the revision, as if
    /// another device had written it.
    pub fn seed(&self, records: Vec<TaskRecord>) {
        let mut state = self.state.lock();
        state.records = records.into_iter().map(canonical).collect();
        state.bump();
    }

    /// Copy of the server list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.state.lock().records.clone()
    }

    /// Current server revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Makes the next call of kind `op` fail with `error`. Failures queue
    /// up per operation.
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Delays every call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of calls of kind `op` received so far.
    #[must_use]
    pub fn call_count(&self, op: Op) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Logs the call, then applies latency, scripted failures and the
    /// revision check.
    async fn begin(&self, op: Op, revision: u64) -> Result<(), RemoteError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(Call { op, revision });
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            tracing::debug!(%op, %error, "scripted failure");
            return Err(error);
        }
        if self.strict_revisions
            && matches!(op, Op::Create | Op::Update | Op::Delete)
            && revision != state.revision
        {
            return Err(RemoteError::HttpStatus(400));
        }
        Ok(())
    }
}

/// The server keeps no local-only metadata.
fn canonical(mut record: TaskRecord) -> TaskRecord {
    record.category = None;
    record
}

impl RemoteTaskService for InMemoryTaskService {
    async fn list(&self, revision: u64) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        self.begin(Op::List, revision).await?;
        let state = self.state.lock();
        Ok(Revisioned::new(state.records.clone(), Some(state.revision)))
    }

    async fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.begin(Op::Create, revision).await?;
        let mut state = self.state.lock();
        if state.position(&record.id).is_some() {
            return Err(RemoteError::HttpStatus(400));
        }
        let stored = canonical(record.clone());
        state.records.push(stored.clone());
        let revision = state.bump();
        Ok(Revisioned::new(stored, Some(revision)))
    }

    async fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        self.begin(Op::Update, revision).await?;
        let mut state = self.state.lock();
        let position = state
            .position(&record.id)
            .ok_or(RemoteError::HttpStatus(404))?;
        let stored = canonical(record.clone());
        state.records[position] = stored.clone();
        let revision = state.bump();
        Ok(Revisioned::new(stored, Some(revision)))
    }

    async fn delete(&self, id: &TaskId, revision: u64) -> Result<Revisioned<()>, RemoteError> {
        self.begin(Op::Delete, revision).await?;
        let mut state = self.state.lock();
        let position = state.position(id).ok_or(RemoteError::HttpStatus(404))?;
        state.records.remove(position);
        let revision = state.bump();
        Ok(Revisioned::new((), Some(revision)))
    }

    async fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        self.begin(Op::BulkReplace, revision).await?;
        let mut state = self.state.lock();
        state.records = records.iter().cloned().map(canonical).collect();
        let revision = state.bump();
        Ok(Revisioned::new(state.records.clone(), Some(revision)))
    }
}
