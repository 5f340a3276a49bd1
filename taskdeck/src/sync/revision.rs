//! Process-wide list revision tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Last list revision reported by the server.
///
/// Only ever moves forward: responses without a revision leave it alone,
/// and a response carrying an older revision than one already seen (an
/// out-of-order reply) is ignored.
#[derive(Debug, Default)]
pub struct RevisionTracker {
    current: AtomicU64,
}

impl RevisionTracker {
    /// Starts tracking at `initial`.
    #[must_use]
    pub const fn new(initial: u64) -> Self {
        Self {
            current: AtomicU64::new(initial),
        }
    }

    /// Revision to send with the next request.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Records a revision from a response and returns the tracked value.
    pub fn observe(&self, revision: Option<u64>) -> u64 {
        match revision {
            Some(revision) => {
                let previous = self.current.fetch_max(revision, Ordering::AcqRel);
                previous.max(revision)
            }
            None => self.current(),
        }
    }
}
