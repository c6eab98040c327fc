//! Catalog entry models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::task::CatalogUpdate;

/// Store-assigned identity of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogId(pub i64);

impl CatalogId {
    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CatalogId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Transcoding status of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    /// Cataloged, transcode requested but not started
    #[default]
    Pending,
    /// A worker is encoding the source
    Processing,
    /// Transcoded output is available
    Completed,
    /// Transcoding failed permanently
    Failed,
}

impl CatalogStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStatus::Pending => "pending",
            CatalogStatus::Processing => "processing",
            CatalogStatus::Completed => "completed",
            CatalogStatus::Failed => "failed",
        }
    }

    /// Whether a report moving an entry from `self` to `next` is accepted.
    ///
    /// Terminal reports may overwrite each other (a redelivered transcode
    /// request reports again), but a late `processing` report never reopens a
    /// terminal entry. Only an explicit reset moves an entry back to `pending`.
    pub fn can_transition_to(&self, next: CatalogStatus) -> bool {
        use CatalogStatus::*;
        match (self, next) {
            (Pending, _) => true,
            (Processing, Processing | Completed | Failed) => true,
            (Completed | Failed, Completed | Failed) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CatalogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown catalog status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for CatalogStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CatalogStatus::Pending),
            "processing" => Ok(CatalogStatus::Processing),
            "completed" => Ok(CatalogStatus::Completed),
            "failed" => Ok(CatalogStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Filesystem metadata for one discovered video file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Absolute source path
    pub original_path: String,
    /// Basename of the file
    pub filename: String,
    /// Extension without the leading dot
    pub file_type: String,
    /// Size in bytes
    pub file_size: u64,
    /// Last modification time
    pub file_date_time: DateTime<Utc>,
}

/// A catalog entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogEntry {
    pub original_path: String,
    pub transcoded_path: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_date_time: DateTime<Utc>,
    pub status: CatalogStatus,
}

impl NewCatalogEntry {
    /// Build a `pending` entry for a freshly scanned file.
    pub fn pending(file: FileDescriptor) -> Self {
        Self {
            original_path: file.original_path,
            transcoded_path: String::new(),
            filename: file.filename,
            file_type: file.file_type,
            file_size: file.file_size,
            file_date_time: file.file_date_time,
            status: CatalogStatus::Pending,
        }
    }
}

/// Persisted description of one source video and its transcoding status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Store-assigned identity
    pub id: CatalogId,

    /// Absolute source path (unique across the catalog)
    pub original_path: String,

    /// Output path, empty until a successful transcode
    #[serde(default)]
    pub transcoded_path: String,

    pub filename: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_date_time: DateTime<Utc>,

    #[serde(default)]
    pub status: CatalogStatus,

    /// Error annotation of the last failed transcode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Materialize a stored entry from its insert form.
    pub fn from_new(id: CatalogId, new: NewCatalogEntry) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_path: new.original_path,
            transcoded_path: new.transcoded_path,
            filename: new.filename,
            file_type: new.file_type,
            file_size: new.file_size,
            file_date_time: new.file_date_time,
            status: new.status,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a worker report. Returns `false` when the transition is refused.
    pub fn apply_update(&mut self, update: &CatalogUpdate) -> bool {
        if !self.status.can_transition_to(update.status) {
            return false;
        }
        self.status = update.status;
        self.transcoded_path = update.transcoded_path.clone().unwrap_or_default();
        self.error_message = update.error_message.clone();
        self.updated_at = Utc::now();
        true
    }

    /// Put a failed (or stuck pending) entry back to `pending`.
    ///
    /// Returns `false` for entries that are completed or being processed.
    pub fn reset(&mut self) -> bool {
        if !matches!(self.status, CatalogStatus::Failed | CatalogStatus::Pending) {
            return false;
        }
        self.status = CatalogStatus::Pending;
        self.transcoded_path.clear();
        self.error_message = None;
        self.updated_at = Utc::now();
        true
    }
}
