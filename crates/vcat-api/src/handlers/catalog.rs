//! Catalog endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vcat_models::{
    CatalogEntry, CatalogId, CatalogReset, CatalogStatus, CatalogTask, TranscodeRequest,
    TranscodeTask, DB_QUEUE, TRANSCODE_QUEUE,
};
use vcat_queue::PublishExt;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Acknowledgement body for accepted asynchronous work.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn accepted(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                message: message.into(),
            }),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub id: Option<String>,
}

async fn load_entry(state: &AppState, id: CatalogId) -> ApiResult<CatalogEntry> {
    state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("video {} not found", id)))
}

/// Trigger a scan of the source root.
pub async fn process_directory(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let task = TranscodeTask::ProcessDirectory;
    state.publisher.publish_message(TRANSCODE_QUEUE, &task).await?;
    metrics::record_message_published(TRANSCODE_QUEUE, task.kind());

    info!("Directory scan requested");
    Ok(MessageResponse::accepted("Directory processing started"))
}

/// List every catalog entry, ordered by id.
pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<CatalogEntry>>> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CatalogEntry>> {
    Ok(Json(load_entry(&state, CatalogId(id)).await?))
}

/// Request an on-demand transcode of one entry's source file.
///
/// The request is not bound to the entry, so its status is left alone.
pub async fn stream_video(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let raw = query
        .id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Video ID is required"))?;
    let id: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid video id '{}'", raw)))?;

    let entry = load_entry(&state, CatalogId(id)).await?;
    let task = TranscodeTask::from(TranscodeRequest::unbound(entry.original_path.clone()));
    state.publisher.publish_message(TRANSCODE_QUEUE, &task).await?;
    metrics::record_message_published(TRANSCODE_QUEUE, task.kind());

    info!(id = %entry.id, source = %entry.original_path, "On-demand transcode requested");
    Ok(MessageResponse::accepted(format!(
        "Transcoding started for {}",
        entry.filename
    )))
}

/// Put a failed entry back into the pipeline.
pub async fn retry_video(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let entry = load_entry(&state, CatalogId(id)).await?;
    if !matches!(entry.status, CatalogStatus::Failed | CatalogStatus::Pending) {
        return Err(ApiError::conflict(format!(
            "video {} is {} and cannot be retried",
            entry.id,
            entry.status.as_str()
        )));
    }

    let task = CatalogTask::ResetMetadata {
        data: CatalogReset { db_id: entry.id },
    };
    state.publisher.publish_message(DB_QUEUE, &task).await?;
    metrics::record_message_published(DB_QUEUE, task.kind());

    info!(id = %entry.id, "Retry requested");
    Ok(MessageResponse::accepted(format!("Retry scheduled for video {}", entry.id)))
}
