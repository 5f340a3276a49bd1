//! Task record model for Taskdeck.
//!
//! A [`TaskRecord`] is the unit of synchronization: its identity never
//! changes, its content is overwritten by the server on reconcile. Records
//! compare with [`TaskRecord::approx_eq`] for sync purposes, which tolerates
//! the sub-second loss of epoch-second encodings on the wire and on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest difference between two timestamps still considered equal.
pub const TIME_TOLERANCE_MS: i64 = 1000;

/// Unique identifier for a task.
///
/// Freshly created ids are UUID v7 strings, but any string received from the
/// server or read from a file is accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How important a task is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// Can wait.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Shown first.
    High,
}

impl Importance {
    /// Local (file) name of the importance level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Parses a local name, also accepting the legacy `medium` and the
    /// server-side `basic`/`important` spellings.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" | "basic" => Some(Self::Normal),
            "high" | "important" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation grouping of a task. Local-only: the server never sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Work.
    Work,
    /// Study.
    Study,
    /// Hobby.
    Hobby,
    /// Anything else.
    Other,
}

impl Category {
    /// Lowercase name used in files and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Study => "study",
            Self::Hobby => "hobby",
            Self::Other => "other",
        }
    }

    /// Parses a category name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "work" => Some(Self::Work),
            "study" => Some(Self::Study),
            "hobby" => Some(Self::Hobby),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a record may not be written to the server or to disk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text is empty after trimming whitespace.
    #[error("task text cannot be empty")]
    EmptyText,
}

/// A single task as stored locally and mirrored on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Globally unique, immutable identifier.
    pub id: TaskId,
    /// Free-form content.
    pub text: String,
    /// Importance level.
    pub importance: Importance,
    /// Optional due date.
    pub deadline: Option<DateTime<Utc>>,
    /// Completion flag.
    pub is_done: bool,
    /// Creation time, never mutated.
    pub created_at: DateTime<Utc>,
    /// Time of the latest mutation after creation.
    pub updated_at: Option<DateTime<Utc>>,
    /// Optional color tag (hex string), carried through untouched.
    pub color: Option<String>,
    /// Optional local grouping, carried through untouched.
    pub category: Option<Category>,
    /// Device that last wrote this record to the server.
    pub last_updated_by: Option<String>,
}

impl TaskRecord {
    /// Creates a record with a fresh id, normal importance, not done,
    /// created now.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            text: text.into(),
            importance: Importance::Normal,
            deadline: None,
            is_done: false,
            created_at: Utc::now(),
            updated_at: None,
            color: None,
            category: None,
            last_updated_by: None,
        }
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the importance.
    #[must_use]
    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the completion flag.
    #[must_use]
    pub fn with_done(mut self, done: bool) -> Self {
        self.is_done = done;
        self
    }

    /// Overrides the creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the color tag. An empty string clears it.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into()).filter(|c| !c.is_empty());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Records a mutation at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }

    /// Checks that the record may be persisted or sent to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyText`] if the text is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        Ok(())
    }

    /// Sync equality: every field equal, timestamps within one second.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.text == other.text
            && self.importance == other.importance
            && self.is_done == other.is_done
            && self.color == other.color
            && self.category == other.category
            && self.last_updated_by == other.last_updated_by
            && times_close(self.created_at, other.created_at)
            && opt_times_close(self.deadline, other.deadline)
            && opt_times_close(self.updated_at, other.updated_at)
    }
}

/// Compares two record slices element-wise with [`TaskRecord::approx_eq`].
#[must_use]
pub fn all_approx_eq(a: &[TaskRecord], b: &[TaskRecord]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y))
}

/// Returns `true` if two instants are at most [`TIME_TOLERANCE_MS`] apart.
#[must_use]
pub fn times_close(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= TIME_TOLERANCE_MS
}

fn opt_times_close(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => times_close(a, b),
        _ => false,
    }
}

/// Whole seconds since the Unix epoch.
#[must_use]
pub fn epoch_seconds(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// Converts epoch seconds back into a UTC instant.
///
/// Returns `None` for values outside chrono's representable range.
#[must_use]
pub fn from_epoch_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
