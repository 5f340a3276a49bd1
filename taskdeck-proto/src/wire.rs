//! Server wire schema for the Taskdeck list API.
//!
//! The server speaks JSON with snake_case keys, epoch-second timestamps and
//! its own importance vocabulary (`low` / `basic` / `important`). This module
//! holds the element and envelope types plus the conversions to and from
//! [`TaskRecord`].

use serde::{Deserialize, Serialize};

use crate::task::{Importance, TaskId, TaskRecord, epoch_seconds, from_epoch_seconds};

/// Header carrying the client's last known list revision.
pub const REVISION_HEADER: &str = "X-Last-Known-Revision";

/// Errors produced while decoding server payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The body is not valid JSON or does not match the schema.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    /// A timestamp cannot be represented.
    #[error("timestamp out of range in `{field}`: {value}")]
    Timestamp {
        /// Wire field holding the bad value.
        field: &'static str,
        /// The offending epoch value.
        value: i64,
    },
}

/// Importance as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireImportance {
    /// Maps to [`Importance::Low`].
    Low,
    /// Maps to [`Importance::Normal`].
    Basic,
    /// Maps to [`Importance::High`].
    Important,
}

impl From<Importance> for WireImportance {
    fn from(importance: Importance) -> Self {
        match importance {
            Importance::Low => Self::Low,
            Importance::Normal => Self::Basic,
            Importance::High => Self::Important,
        }
    }
}

impl From<WireImportance> for Importance {
    fn from(importance: WireImportance) -> Self {
        match importance {
            WireImportance::Low => Self::Low,
            WireImportance::Basic => Self::Normal,
            WireImportance::Important => Self::High,
        }
    }
}

/// One task element as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireElement {
    /// Task id.
    pub id: String,
    /// Task text.
    pub text: String,
    /// Importance in wire vocabulary.
    pub importance: WireImportance,
    /// Optional deadline, epoch seconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_epoch"
    )]
    pub deadline: Option<i64>,
    /// Completion flag.
    pub done: bool,
    /// Creation time, epoch seconds.
    #[serde(deserialize_with = "de_epoch")]
    pub created_at: i64,
    /// Last change time, epoch seconds.
    #[serde(deserialize_with = "de_epoch")]
    pub changed_at: i64,
    /// Optional color tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Device that made the last change.
    #[serde(default)]
    pub last_updated_by: String,
}

impl WireElement {
    /// Builds the wire form of a record.
    ///
    /// `changed_at` falls back to `created_at` for never-edited records, and
    /// `last_updated_by` falls back to `device_id`.
    #[must_use]
    pub fn from_record(record: &TaskRecord, device_id: &str) -> Self {
        Self {
            id: record.id.as_str().to_string(),
            text: record.text.clone(),
            importance: record.importance.into(),
            deadline: record.deadline.map(epoch_seconds),
            done: record.is_done,
            created_at: epoch_seconds(record.created_at),
            changed_at: epoch_seconds(record.updated_at.unwrap_or(record.created_at)),
            color: record.color.clone(),
            last_updated_by: record
                .last_updated_by
                .clone()
                .unwrap_or_else(|| device_id.to_string()),
        }
    }

    /// Converts the element into a record.
    ///
    /// A `changed_at` equal to `created_at` means the record was never
    /// edited and yields `updated_at = None`. The local-only category is
    /// always `None`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Timestamp`] if a timestamp is out of range.
    pub fn into_record(self) -> Result<TaskRecord, WireError> {
        let created_at = to_time("created_at", self.created_at)?;
        let updated_at = if self.changed_at == self.created_at {
            None
        } else {
            Some(to_time("changed_at", self.changed_at)?)
        };
        let deadline = self
            .deadline
            .map(|secs| to_time("deadline", secs))
            .transpose()?;
        Ok(TaskRecord {
            id: TaskId::from_string(self.id),
            text: self.text,
            importance: self.importance.into(),
            deadline,
            is_done: self.done,
            created_at,
            updated_at,
            color: self.color.filter(|c| !c.is_empty()),
            category: None,
            last_updated_by: Some(self.last_updated_by).filter(|d| !d.is_empty()),
        })
    }
}

/// `{ "list": [...], "revision": n }`: list responses and PATCH bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEnvelope {
    /// Elements of the list.
    pub list: Vec<WireElement>,
    /// List revision; absent in requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// `{ "element": {...}, "revision": n }`: single element requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEnvelope {
    /// The element.
    pub element: WireElement,
    /// List revision; absent in requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// Any response body, read only for its revision.
#[derive(Debug, Default, Deserialize)]
struct RevisionOnly {
    #[serde(default)]
    revision: Option<u64>,
}

/// Builds a PATCH / list body from records.
#[must_use]
pub fn list_body(records: &[TaskRecord], device_id: &str) -> ListEnvelope {
    ListEnvelope {
        list: records
            .iter()
            .map(|r| WireElement::from_record(r, device_id))
            .collect(),
        revision: None,
    }
}

/// Builds a POST / PUT body from a record.
#[must_use]
pub fn element_body(record: &TaskRecord, device_id: &str) -> ElementEnvelope {
    ElementEnvelope {
        element: WireElement::from_record(record, device_id),
        revision: None,
    }
}

/// Decodes a list response into records and its revision.
///
/// # Errors
///
/// Returns [`WireError`] if the body is malformed or a timestamp is out of range.
pub fn decode_list(bytes: &[u8]) -> Result<(Vec<TaskRecord>, Option<u64>), WireError> {
    let envelope: ListEnvelope = serde_json::from_slice(bytes)?;
    let records = envelope
        .list
        .into_iter()
        .map(WireElement::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((records, envelope.revision))
}

/// Decodes a single-element response into a record and its revision.
///
/// # Errors
///
/// Returns [`WireError`] if the body is malformed or a timestamp is out of range.
pub fn decode_element(bytes: &[u8]) -> Result<(TaskRecord, Option<u64>), WireError> {
    let envelope: ElementEnvelope = serde_json::from_slice(bytes)?;
    Ok((envelope.element.into_record()?, envelope.revision))
}

/// Reads only the revision of a response body. An empty body has none.
///
/// # Errors
///
/// Returns [`WireError::Json`] if a non-empty body is not a JSON object.
pub fn decode_revision(bytes: &[u8]) -> Result<Option<u64>, WireError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let body: RevisionOnly = serde_json::from_slice(bytes)?;
    Ok(body.revision)
}

fn to_time(field: &'static str, value: i64) -> Result<chrono::DateTime<chrono::Utc>, WireError> {
    from_epoch_seconds(value).ok_or(WireError::Timestamp { field, value })
}

/// Epoch values arrive as integers from well-behaved servers and as floats
/// from clients that send fractional seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum EpochRepr {
    Int(i64),
    Float(f64),
}

impl EpochRepr {
    #[allow(clippy::cast_possible_truncation)]
    fn seconds(self) -> i64 {
        match self {
            Self::Int(secs) => secs,
            // Saturating float-to-int cast, fraction dropped.
            Self::Float(secs) => secs.floor() as i64,
        }
    }
}

fn de_epoch<'de, D: serde::Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    EpochRepr::deserialize(d).map(EpochRepr::seconds)
}

fn de_opt_epoch<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<EpochRepr>::deserialize(d).map(|v| v.map(EpochRepr::seconds))
}
