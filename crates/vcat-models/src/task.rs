//! Message envelopes exchanged over the broker.
//!
//! Every envelope is a JSON object discriminated by its `task` field. Payloads
//! with an unrecognized `task` decode to the `Unknown` variant so consumers can
//! drop them instead of failing.

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogId, CatalogStatus, FileDescriptor};

/// Queue consumed by the worker (scan triggers and transcode requests).
pub const TRANSCODE_QUEUE: &str = "transcode_queue";

/// Queue consumed by the catalog reconciler.
pub const DB_QUEUE: &str = "db_queue";

/// Messages on the transcode queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TranscodeTask {
    /// Walk the configured video root and catalog every video found
    ProcessDirectory,
    /// Encode one source file
    TranscodeVideo(TranscodeRequest),
    #[serde(other)]
    Unknown,
}

impl TranscodeTask {
    /// Value of the `task` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeTask::ProcessDirectory => "process_directory",
            TranscodeTask::TranscodeVideo(_) => "transcode_video",
            TranscodeTask::Unknown => "unknown",
        }
    }
}

/// Request to encode one file.
///
/// `db_id` is `None` for on-demand requests that are not bound to a catalog
/// entry; those produce no catalog update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeRequest {
    #[serde(default)]
    pub db_id: Option<CatalogId>,
    pub original_path: String,
}

impl TranscodeRequest {
    /// Request bound to a catalog entry.
    pub fn for_entry(db_id: CatalogId, original_path: impl Into<String>) -> Self {
        Self {
            db_id: Some(db_id),
            original_path: original_path.into(),
        }
    }

    /// On-demand request with no catalog identity.
    pub fn unbound(original_path: impl Into<String>) -> Self {
        Self {
            db_id: None,
            original_path: original_path.into(),
        }
    }
}

impl From<TranscodeRequest> for TranscodeTask {
    fn from(request: TranscodeRequest) -> Self {
        TranscodeTask::TranscodeVideo(request)
    }
}

/// Messages on the catalog queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum CatalogTask {
    /// Catalog a newly scanned file
    CreateMetadata { data: FileDescriptor },
    /// Record the outcome of a transcode
    UpdateMetadata { data: CatalogUpdate },
    /// Put a failed entry back to pending and request a new transcode
    ResetMetadata { data: CatalogReset },
    #[serde(other)]
    Unknown,
}

impl CatalogTask {
    /// Value of the `task` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogTask::CreateMetadata { .. } => "create_metadata",
            CatalogTask::UpdateMetadata { .. } => "update_metadata",
            CatalogTask::ResetMetadata { .. } => "reset_metadata",
            CatalogTask::Unknown => "unknown",
        }
    }
}

/// Status report for one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogUpdate {
    pub db_id: CatalogId,
    pub status: CatalogStatus,
    #[serde(default)]
    pub transcoded_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CatalogUpdate {
    /// Encoding has started.
    pub fn processing(db_id: CatalogId) -> Self {
        Self {
            db_id,
            status: CatalogStatus::Processing,
            transcoded_path: None,
            error_message: None,
        }
    }

    /// Encoding succeeded and produced `transcoded_path`.
    pub fn completed(db_id: CatalogId, transcoded_path: impl Into<String>) -> Self {
        Self {
            db_id,
            status: CatalogStatus::Completed,
            transcoded_path: Some(transcoded_path.into()),
            error_message: None,
        }
    }

    /// Encoding failed permanently.
    pub fn failed(db_id: CatalogId, error: impl Into<String>) -> Self {
        Self {
            db_id,
            status: CatalogStatus::Failed,
            transcoded_path: None,
            error_message: Some(error.into()),
        }
    }
}

impl From<CatalogUpdate> for CatalogTask {
    fn from(update: CatalogUpdate) -> Self {
        CatalogTask::UpdateMetadata { data: update }
    }
}

impl From<FileDescriptor> for CatalogTask {
    fn from(file: FileDescriptor) -> Self {
        CatalogTask::CreateMetadata { data: file }
    }
}

/// Reset request for one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogReset {
    pub db_id: CatalogId,
}
