//! Offline-first synchronization between the local store and the server.
//!
//! [`SyncEngine`] applies every mutation to the local store first, then
//! forwards it to a [`RemoteTaskService`](crate::remote::RemoteTaskService).
//! Failures never undo local state: the affected record stays
//! *unconfirmed*, the engine reports itself dirty, and a later
//! [`SyncEngine::synchronize`] pushes the whole list in one bulk replace.

pub mod engine;
pub mod reconcile;
pub mod revision;

pub use engine::{EngineOptions, SyncEngine, SyncState};
pub use reconcile::{ReconcileReport, reconcile};
pub use revision::RevisionTracker;

use taskdeck_proto::task::{TaskId, ValidationError};

use crate::remote::{Op, RemoteError};

/// Errors surfaced by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The server call failed. Local state was kept.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The record may not be written.
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    /// No local record has this id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A local record already has this id.
    #[error("task already exists: {0}")]
    Duplicate(TaskId),
}

/// Result of [`SyncEngine::synchronize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was dirty; no request was made.
    UpToDate,
    /// The list was pushed and reconciled.
    Synchronized(ReconcileReport),
}

/// Progress notifications for a UI.
///
/// Delivered best-effort on a bounded channel: when the receiver lags,
/// events are dropped rather than blocking the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A remote call was issued.
    OperationStarted {
        /// Operation kind.
        op: Op,
        /// Affected record, for single-element operations.
        id: Option<TaskId>,
    },
    /// A remote call succeeded.
    OperationSucceeded {
        /// Operation kind.
        op: Op,
        /// Affected record, for single-element operations.
        id: Option<TaskId>,
        /// Tracked revision after the call.
        revision: u64,
    },
    /// A remote call failed; local state was kept.
    OperationFailed {
        /// Operation kind.
        op: Op,
        /// Affected record, for single-element operations.
        id: Option<TaskId>,
        /// The failure.
        error: RemoteError,
    },
    /// The local store was reconciled against a server snapshot.
    Reconciled(ReconcileReport),
    /// The dirty flag flipped.
    DirtyChanged(bool),
    /// Writing the local snapshot failed. In-memory state is unaffected.
    PersistFailed {
        /// Description of the error.
        reason: String,
    },
    /// Reading the local snapshot failed at load time.
    LocalLoadFailed {
        /// Description of the error.
        reason: String,
    },
}
