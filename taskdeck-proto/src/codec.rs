//! Local file codecs for task lists.
//!
//! Two interchangeable on-disk formats share one schema (version 1):
//!
//! - **JSON**: an array of camelCase objects with epoch-second timestamps.
//! - **Tabular**: a header line naming the columns present, then one
//!   comma-separated row per task (RFC 4180 quoting).
//!
//! Optional columns and keys are written only when at least one record
//! carries data for them. Readers never rely on column position: the tabular
//! decoder resolves every column through a [`ColumnMap`] built from the
//! header once per decode.
//!
//! An empty color tag means no color: both codecs write it as absent and
//! read a blank value back as `None`.
//!
//! # Migration
//!
//! Older files stored timestamps as ISO-8601 strings, used `isReady` as the
//! JSON completion key, and spelled normal importance `medium`. All of these
//! are accepted on read; the next write emits schema version 1.

use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::task::{
    Category, Importance, TaskId, TaskRecord, epoch_seconds, from_epoch_seconds,
};

/// Errors produced by the file codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encode or decode failure.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    /// Tabular encode or decode failure.
    #[error("tabular codec error: {0}")]
    Tabular(#[from] csv::Error),
    /// A required tabular column is missing from the header.
    #[error("missing required column `{0}`")]
    MissingColumn(&'static str),
    /// A value cannot be interpreted.
    #[error("invalid value for `{field}`: {value:?}")]
    InvalidValue {
        /// Field or column name.
        field: &'static str,
        /// The raw value.
        value: String,
    },
}

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// JSON array of task objects.
    #[default]
    Json,
    /// Comma-separated rows under a named header.
    Tabular,
}

impl FileFormat {
    /// Picks a format from a file extension (`json`, `csv`/`tsv`-less `tabular`).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" | "tabular" => Some(Self::Tabular),
            _ => None,
        }
    }

    /// Parses a format name as used in config files and on the command line.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "tabular" | "csv" => Some(Self::Tabular),
            _ => None,
        }
    }

    /// Encodes records in this format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization fails.
    pub fn encode(self, records: &[TaskRecord]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => encode_json(records),
            Self::Tabular => encode_tabular(records),
        }
    }

    /// Decodes records in this format. Blank input decodes as an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the input is malformed.
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<TaskRecord>, CodecError> {
        match self {
            Self::Json => decode_json(bytes),
            Self::Tabular => decode_tabular(bytes),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Tabular => f.write_str("tabular"),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRecord {
    id: String,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    importance: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_time"
    )]
    deadline: Option<i64>,
    #[serde(default, alias = "isReady")]
    is_done: bool,
    #[serde(deserialize_with = "de_time")]
    created_at: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_time"
    )]
    updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated_by: Option<String>,
}

impl JsonRecord {
    fn from_record(record: &TaskRecord) -> Self {
        Self {
            id: record.id.as_str().to_string(),
            text: record.text.clone(),
            importance: importance_cell(record.importance),
            deadline: record.deadline.map(epoch_seconds),
            is_done: record.is_done,
            created_at: epoch_seconds(record.created_at),
            updated_at: record.updated_at.map(epoch_seconds),
            color: record.color.clone().filter(|c| !c.is_empty()),
            category: record.category.map(|c| c.as_str().to_string()),
            last_updated_by: record.last_updated_by.clone(),
        }
    }

    fn into_record(self) -> Result<TaskRecord, CodecError> {
        Ok(TaskRecord {
            id: TaskId::from_string(self.id),
            text: self.text,
            importance: self
                .importance
                .as_deref()
                .and_then(Importance::from_name)
                .unwrap_or_default(),
            deadline: self.deadline.map(|s| to_time("deadline", s)).transpose()?,
            is_done: self.is_done,
            created_at: to_time("createdAt", self.created_at)?,
            updated_at: self
                .updated_at
                .map(|s| to_time("updatedAt", s))
                .transpose()?,
            color: self.color.filter(|c| !c.is_empty()),
            category: self.category.as_deref().and_then(Category::from_name),
            last_updated_by: self.last_updated_by,
        })
    }
}

/// Encodes records as a JSON array.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_json(records: &[TaskRecord]) -> Result<Vec<u8>, CodecError> {
    let rows: Vec<JsonRecord> = records.iter().map(JsonRecord::from_record).collect();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

/// Decodes a JSON array of records.
///
/// # Errors
///
/// Returns [`CodecError`] if the JSON is malformed or a timestamp is invalid.
pub fn decode_json(bytes: &[u8]) -> Result<Vec<TaskRecord>, CodecError> {
    if is_blank(bytes) {
        return Ok(Vec::new());
    }
    let rows: Vec<JsonRecord> = serde_json::from_slice(bytes)?;
    rows.into_iter().map(JsonRecord::into_record).collect()
}

/// Timestamps in files: epoch seconds now, ISO-8601 strings in old files.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Epoch(i64),
    Fractional(f64),
    Iso(String),
}

impl TimeRepr {
    #[allow(clippy::cast_possible_truncation)]
    fn seconds<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            Self::Epoch(secs) => Ok(secs),
            Self::Fractional(secs) => Ok(secs.floor() as i64),
            Self::Iso(text) => parse_iso(&text)
                .ok_or_else(|| E::custom(format!("invalid timestamp {text:?}"))),
        }
    }
}

fn de_time<'de, D: serde::Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    TimeRepr::deserialize(d)?.seconds()
}

fn de_opt_time<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<TimeRepr>::deserialize(d)?
        .map(TimeRepr::seconds)
        .transpose()
}

// ---------------------------------------------------------------------------
// Tabular
// ---------------------------------------------------------------------------

/// A named tabular column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Id,
    Text,
    Importance,
    IsReady,
    CreatedAt,
    Deadline,
    UpdatedAt,
    Color,
    Category,
    LastUpdatedBy,
}

impl Column {
    /// Output order of columns.
    const ALL: [Self; 10] = [
        Self::Id,
        Self::Text,
        Self::Importance,
        Self::IsReady,
        Self::CreatedAt,
        Self::Deadline,
        Self::UpdatedAt,
        Self::Color,
        Self::Category,
        Self::LastUpdatedBy,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Text => "text",
            Self::Importance => "importance",
            Self::IsReady => "isReady",
            Self::CreatedAt => "createdAt",
            Self::Deadline => "deadline",
            Self::UpdatedAt => "updatedAt",
            Self::Color => "color",
            Self::Category => "category",
            Self::LastUpdatedBy => "lastUpdatedBy",
        }
    }

    fn from_header(header: &str) -> Option<Self> {
        let header = header.trim();
        if header == "isDone" {
            return Some(Self::IsReady);
        }
        Self::ALL.into_iter().find(|c| c.name() == header)
    }

    /// Columns written even when every record lacks data for them.
    const fn is_required(self) -> bool {
        matches!(self, Self::Id | Self::Text | Self::IsReady | Self::CreatedAt)
    }

    fn has_data(self, record: &TaskRecord) -> bool {
        match self {
            Self::Id | Self::Text | Self::IsReady | Self::CreatedAt => true,
            Self::Importance => record.importance != Importance::Normal,
            Self::Deadline => record.deadline.is_some(),
            Self::UpdatedAt => record.updated_at.is_some(),
            Self::Color => record.color.as_deref().is_some_and(|c| !c.is_empty()),
            Self::Category => record.category.is_some(),
            Self::LastUpdatedBy => record.last_updated_by.is_some(),
        }
    }

    fn cell(self, record: &TaskRecord) -> String {
        match self {
            Self::Id => record.id.as_str().to_string(),
            Self::Text => record.text.clone(),
            Self::Importance => importance_cell(record.importance).unwrap_or_default(),
            Self::IsReady => record.is_done.to_string(),
            Self::CreatedAt => epoch_seconds(record.created_at).to_string(),
            Self::Deadline => record
                .deadline
                .map(|t| epoch_seconds(t).to_string())
                .unwrap_or_default(),
            Self::UpdatedAt => record
                .updated_at
                .map(|t| epoch_seconds(t).to_string())
                .unwrap_or_default(),
            Self::Color => record.color.clone().unwrap_or_default(),
            Self::Category => record
                .category
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            Self::LastUpdatedBy => record.last_updated_by.clone().unwrap_or_default(),
        }
    }
}

/// Header name → column index, resolved once per decode.
#[derive(Debug, Default)]
pub struct ColumnMap {
    index: [Option<usize>; Column::ALL.len()],
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = Self::default();
        for (position, header) in headers.iter().enumerate() {
            if let Some(column) = Column::from_header(header) {
                // First occurrence wins on duplicated headers.
                map.index[column as usize].get_or_insert(position);
            }
        }
        map
    }

    fn require(&self, column: Column) -> Result<(), CodecError> {
        if self.index[column as usize].is_none() {
            return Err(CodecError::MissingColumn(column.name()));
        }
        Ok(())
    }

    /// Raw cell, `None` if the column is absent.
    fn raw<'r>(&self, row: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        self.index[column as usize].and_then(|i| row.get(i))
    }

    /// Non-empty cell, `None` if the column is absent or the cell blank.
    fn value<'r>(&self, row: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        self.raw(row, column).filter(|v| !v.is_empty())
    }

    fn record(&self, row: &csv::StringRecord) -> Result<TaskRecord, CodecError> {
        let id = self.raw(row, Column::Id).unwrap_or_default();
        let text = self.raw(row, Column::Text).unwrap_or_default();
        let created_at = self
            .value(row, Column::CreatedAt)
            .ok_or(CodecError::InvalidValue {
                field: Column::CreatedAt.name(),
                value: String::new(),
            })
            .and_then(|v| parse_time_cell(Column::CreatedAt, v))?;
        let is_done = match self.value(row, Column::IsReady) {
            None => false,
            Some(v) => parse_bool(v).ok_or_else(|| CodecError::InvalidValue {
                field: Column::IsReady.name(),
                value: v.to_string(),
            })?,
        };
        Ok(TaskRecord {
            id: TaskId::from_string(id),
            text: text.to_string(),
            importance: self
                .value(row, Column::Importance)
                .and_then(Importance::from_name)
                .unwrap_or_default(),
            deadline: self
                .value(row, Column::Deadline)
                .map(|v| parse_time_cell(Column::Deadline, v))
                .transpose()?,
            is_done,
            created_at,
            updated_at: self
                .value(row, Column::UpdatedAt)
                .map(|v| parse_time_cell(Column::UpdatedAt, v))
                .transpose()?,
            color: self.value(row, Column::Color).map(str::to_string),
            category: self
                .value(row, Column::Category)
                .and_then(Category::from_name),
            last_updated_by: self.value(row, Column::LastUpdatedBy).map(str::to_string),
        })
    }
}

/// Encodes records as a header line plus one row per record.
///
/// # Errors
///
/// Returns [`CodecError::Tabular`] if writing fails.
pub fn encode_tabular(records: &[TaskRecord]) -> Result<Vec<u8>, CodecError> {
    let columns: Vec<Column> = Column::ALL
        .into_iter()
        .filter(|c| c.is_required() || records.iter().any(|r| c.has_data(r)))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(columns.iter().map(|c| c.name()))?;
    for record in records {
        writer.write_record(columns.iter().map(|c| c.cell(record)))?;
    }
    writer
        .into_inner()
        .map_err(|e| CodecError::Tabular(csv::Error::from(e.into_error())))
}

/// Decodes tabular data, resolving columns by header name.
///
/// # Errors
///
/// Returns [`CodecError::MissingColumn`] if `id`, `text` or `createdAt` is
/// absent, or another [`CodecError`] for malformed rows.
pub fn decode_tabular(bytes: &[u8]) -> Result<Vec<TaskRecord>, CodecError> {
    if is_blank(bytes) {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);
    let columns = ColumnMap::from_headers(reader.headers()?);
    for required in [Column::Id, Column::Text, Column::CreatedAt] {
        columns.require(required)?;
    }
    let mut records = Vec::new();
    for row in reader.records() {
        records.push(columns.record(&row?)?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Normal importance is implied by absence.
fn importance_cell(importance: Importance) -> Option<String> {
    (importance != Importance::Normal).then(|| importance.as_str().to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_iso(text: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.timestamp())
}

fn parse_time_cell(column: Column, value: &str) -> Result<DateTime<chrono::Utc>, CodecError> {
    let invalid = || CodecError::InvalidValue {
        field: column.name(),
        value: value.to_string(),
    };
    let secs = value
        .trim()
        .parse::<i64>()
        .ok()
        .or_else(|| parse_iso(value))
        .ok_or_else(invalid)?;
    from_epoch_seconds(secs).ok_or_else(invalid)
}

fn to_time(field: &'static str, secs: i64) -> Result<DateTime<chrono::Utc>, CodecError> {
    from_epoch_seconds(secs).ok_or_else(|| CodecError::InvalidValue {
        field,
        value: secs.to_string(),
    })
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}
