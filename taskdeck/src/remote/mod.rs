//! Remote task service abstraction.
//!
//! Defines the [`RemoteTaskService`] trait the sync engine talks to.
//! Concrete implementations include:
//! - [`http::HttpTaskService`]: the list API over HTTPS
//! - [`memory::InMemoryTaskService`]: in-process server double for tests
//!   and offline demos

pub mod http;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use taskdeck_proto::task::{TaskId, TaskRecord};

pub use http::HttpTaskService;
pub use memory::InMemoryTaskService;

/// Remote operations, used in events, logs and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Fetch the whole list.
    List,
    /// Create one element.
    Create,
    /// Replace one element.
    Update,
    /// Delete one element.
    Delete,
    /// Replace the whole list.
    BulkReplace,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::BulkReplace => write!(f, "bulk-replace"),
        }
    }
}

/// A response value with the list revision the server reported, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revisioned<T> {
    /// The decoded payload.
    pub value: T,
    /// Server list revision after the call.
    pub revision: Option<u64>,
}

impl<T> Revisioned<T> {
    /// Wraps a value with a revision.
    pub const fn new(value: T, revision: Option<u64>) -> Self {
        Self { value, revision }
    }
}

/// Errors that can occur talking to the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The server could not be reached or did not answer in time.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server returned HTTP {0}")]
    HttpStatus(u16),

    /// The response body could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),
}

/// Async contract of the remote list service.
///
/// Every call carries the caller's last known list revision and reports
/// the server's revision afterwards. Implementations never retry; the sync
/// engine decides what a failure means.
pub trait RemoteTaskService: Send + Sync {
    /// Fetches the authoritative list.
    fn list(
        &self,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<Vec<TaskRecord>>, RemoteError>> + Send;

    /// Creates `record` and returns the server's canonical copy.
    fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<TaskRecord>, RemoteError>> + Send;

    /// Replaces the element with `record.id` and returns the canonical copy.
    fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<TaskRecord>, RemoteError>> + Send;

    /// Deletes the element with `id`.
    fn delete(
        &self,
        id: &TaskId,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<()>, RemoteError>> + Send;

    /// Replaces the whole list and returns the canonical result.
    fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<Vec<TaskRecord>>, RemoteError>> + Send;
}

impl<T: RemoteTaskService> RemoteTaskService for Arc<T> {
    fn list(
        &self,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<Vec<TaskRecord>>, RemoteError>> + Send
    {
        (**self).list(revision)
    }

    fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<TaskRecord>, RemoteError>> + Send {
        (**self).create(record, revision)
    }

    fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<TaskRecord>, RemoteError>> + Send {
        (**self).update(record, revision)
    }

    fn delete(
        &self,
        id: &TaskId,
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<()>, RemoteError>> + Send {
        (**self).delete(id, revision)
    }

    fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> impl std::future::Future<Output = Result<Revisioned<Vec<TaskRecord>>, RemoteError>> + Send
    {
        (**self).bulk_replace(records, revision)
    }
}
