//! Local task storage and persistence backends.
//!
//! [`LocalStore`] is the in-memory, insertion-ordered collection the sync
//! engine mutates. It never touches the disk on its own: snapshots go
//! through a [`Persistence`] backend, either [`file::FileBackend`] for a
//! JSON or tabular file or [`memory::InMemoryBackend`] for tests and
//! ephemeral sessions.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use taskdeck_proto::codec::CodecError;
use taskdeck_proto::task::{TaskId, TaskRecord};

pub use file::FileBackend;
pub use memory::InMemoryBackend;

/// Errors that can occur during persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored data could not be encoded or decoded.
    #[error("storage format error: {0}")]
    Codec(#[from] CodecError),

    /// The backend is unavailable (full, read-only, disconnected).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Trait for loading and saving a full task list snapshot.
///
/// Implementations include:
/// - [`FileBackend`]: one JSON or tabular file, written atomically
/// - [`InMemoryBackend`]: volatile, with failure injection for tests
pub trait Persistence: Send + Sync {
    /// Loads the stored list. A backend with nothing stored yet returns an
    /// empty list.
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send;

    /// Replaces the stored list with `records`.
    fn save(
        &self,
        records: &[TaskRecord],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

impl<T: Persistence> Persistence for Arc<T> {
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send {
        (**self).load()
    }

    fn save(
        &self,
        records: &[TaskRecord],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send {
        (**self).save(records)
    }
}

/// Keyed, insertion-ordered task collection.
///
/// Ids are unique. Positions are stable across updates; removal shifts the
/// records after the removed one.
#[derive(Debug, Default, Clone)]
pub struct LocalStore {
    records: Vec<TaskRecord>,
    index: HashMap<TaskId, usize>,
}

impl LocalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records, keeping the first of any duplicated id.
    #[must_use]
    pub fn from_records(records: Vec<TaskRecord>) -> Self {
        let mut store = Self::new();
        store.replace_all(records);
        store
    }

    /// Inserts `record` unless its id is already present.
    ///
    /// Returns `true` if the record was inserted. The first write wins.
    pub fn add(&mut self, record: TaskRecord) -> bool {
        if self.index.contains_key(&record.id) {
            return false;
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    /// Removes the record with `id`, returning it. Removing an absent id is
    /// a no-op.
    pub fn remove(&mut self, id: &TaskId) -> Option<TaskRecord> {
        let position = self.index.remove(id)?;
        let removed = self.records.remove(position);
        for record in &self.records[position..] {
            if let Some(slot) = self.index.get_mut(&record.id) {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Upserts `record`: replaces in place if the id exists, appends
    /// otherwise. Returns the previous value.
    pub fn update(&mut self, record: TaskRecord) -> Option<TaskRecord> {
        match self.index.get(&record.id) {
            Some(&position) => Some(std::mem::replace(&mut self.records[position], record)),
            None => {
                self.add(record);
                None
            }
        }
    }

    /// Returns the record with `id`.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Returns `true` if a record with `id` exists.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.records.iter().map(|r| &r.id)
    }

    /// Iterates records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter()
    }

    /// Copies out every record in insertion order.
    #[must_use]
    pub fn fetch_all(&self) -> Vec<TaskRecord> {
        self.records.clone()
    }

    /// Replaces the whole collection. Duplicated ids keep their first
    /// occurrence; later ones are dropped with a warning.
    pub fn replace_all(&mut self, records: Vec<TaskRecord>) {
        self.records.clear();
        self.index.clear();
        for record in records {
            let id = record.id.clone();
            if !self.add(record) {
                tracing::warn!(id = %id, "duplicate task id in stored list, keeping the first");
            }
        }
    }

    /// Writes a snapshot through `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails. The in-memory state is
    /// unaffected either way.
    pub async fn persist<P: Persistence>(&self, backend: &P) -> Result<(), StoreError> {
        backend.save(&self.records).await.inspect_err(|e| {
            tracing::warn!(error = %e, count = self.records.len(), "task list not persisted");
        })
    }

    /// Replaces the collection with what `backend` holds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if loading fails; the collection is left
    /// unchanged in that case.
    pub async fn reload<P: Persistence>(&mut self, backend: &P) -> Result<usize, StoreError> {
        let records = backend.load().await.inspect_err(|e| {
            tracing::warn!(error = %e, "stored task list could not be loaded");
        })?;
        self.replace_all(records);
        Ok(self.len())
    }
}
