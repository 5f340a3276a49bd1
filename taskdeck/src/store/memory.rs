//! Volatile persistence backend for tests and ephemeral sessions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use taskdeck_proto::task::TaskRecord;

use super::{Persistence, StoreError};

/// Keeps the last saved snapshot in memory.
///
/// [`set_failing`](Self::set_failing) makes every subsequent load and save
/// fail with [`StoreError::Unavailable`], to exercise error paths.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: Mutex<Vec<TaskRecord>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that already holds `records`.
    #[must_use]
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Toggles failure injection.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Copy of the last saved snapshot.
    #[must_use]
    pub fn stored(&self) -> Vec<TaskRecord> {
        self.records.lock().clone()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Persistence for InMemoryBackend {
    async fn load(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.check()?;
        Ok(self.records.lock().clone())
    }

    async fn save(&self, records: &[TaskRecord]) -> Result<(), StoreError> {
        self.check()?;
        *self.records.lock() = records.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
