//! File-backed persistence.
//!
//! The whole list is rewritten on every save: encoded in memory, written to
//! a sibling temp file, then renamed over the target so a crash never
//! leaves a half-written list behind.

use std::path::{Path, PathBuf};

use taskdeck_proto::codec::FileFormat;
use taskdeck_proto::task::TaskRecord;

use super::{Persistence, StoreError};

/// Persists a task list in one file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    format: FileFormat,
}

impl FileBackend {
    /// Creates a backend for `path` in the given format.
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Creates a backend, inferring the format from the file extension
    /// (`.csv` → tabular, anything else → JSON).
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileFormat::from_extension)
            .unwrap_or_default();
        Self { path, format }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format used for encoding.
    #[must_use]
    pub const fn format(&self) -> FileFormat {
        self.format
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for FileBackend {
    async fn load(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no task file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let records = self.format.decode(&bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            format = %self.format,
            count = records.len(),
            "task file loaded"
        );
        Ok(records)
    }

    async fn save(&self, records: &[TaskRecord]) -> Result<(), StoreError> {
        let bytes = self.format.encode(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        tracing::debug!(
            path = %self.path.display(),
            count = records.len(),
            bytes = bytes.len(),
            "task file saved"
        );
        Ok(())
    }
}
