//! Video API handlers.

use std::collections::{BTreeMap, HashSet};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vstream_models::{
    validate_source_key, EncodeState, NewVideo, ProcessingState, Resolution, VariantId, Video,
    VideoId, VideoVariant,
};
use vstream_queue::{QueueJob, StartEncodingJob};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Registration of an uploaded source.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateVideoRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,

    /// Storage key of the upload, under `videos/originals/`
    pub source_key: String,
}

#[derive(Debug, Serialize)]
pub struct EncodeQueuedResponse {
    pub video_id: VideoId,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateVideoResponse {
    pub video: Video,
    pub job_id: String,
}

/// Encode state of one resolution.
#[derive(Debug, Serialize)]
pub struct ResolutionStatus {
    pub resolution: Resolution,
    #[serde(flatten)]
    pub state: EncodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VideoDetailResponse {
    #[serde(flatten)]
    pub video: Video,
    pub processing_state: ProcessingState,
    pub is_streamable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    pub resolutions: Vec<ResolutionStatus>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub files_removed: u32,
    pub files_failed: u32,
}

/// `POST /api/videos`: register an upload and queue its encode.
pub async fn create_video(
    State(state): State<AppState>,
    Json(request): Json<CreateVideoRequest>,
) -> ApiResult<(StatusCode, Json<CreateVideoResponse>)> {
    request.validate()?;
    validate_source_key(&request.source_key).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let video = state
        .store
        .create_video(NewVideo {
            title: request.title.trim().to_string(),
            description: request.description,
            source_key: request.source_key,
        })
        .await?;

    let job_id = enqueue_encode(&state, video.id).await?;
    info!(video_id = %video.id, job_id = %job_id, "Video registered");

    Ok((StatusCode::ACCEPTED, Json(CreateVideoResponse { video, job_id })))
}

/// `GET /api/videos/:id`: record, readiness and per-resolution state.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<VideoId>,
) -> ApiResult<Json<VideoDetailResponse>> {
    let video = find_video(&state, video_id).await?;
    let variants = state.store.list_variants(video_id).await?;
    let marked: HashSet<VariantId> = state
        .store
        .list_markers()
        .await?
        .into_iter()
        .filter_map(|m| m.variant_id)
        .collect();

    let manifest_url = video
        .manifest_key
        .as_deref()
        .filter(|_| video.is_streamable())
        .map(|key| state.public_url(key));

    Ok(Json(VideoDetailResponse {
        processing_state: video.processing_state(),
        is_streamable: video.is_streamable(),
        manifest_url,
        resolutions: resolution_statuses(&variants, &marked),
        video,
    }))
}

/// `POST /api/videos/:id/encode`: explicitly queue an encode.
pub async fn encode_video(
    State(state): State<AppState>,
    Path(video_id): Path<VideoId>,
) -> ApiResult<(StatusCode, Json<EncodeQueuedResponse>)> {
    let video = find_video(&state, video_id).await?;
    if video.processing {
        return Err(ApiError::conflict(format!("video {video_id} is already encoding")));
    }

    let job_id = enqueue_encode(&state, video_id).await?;
    Ok((StatusCode::ACCEPTED, Json(EncodeQueuedResponse { video_id, job_id })))
}

/// `DELETE /api/videos/:id`: remove records, then stored files.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<VideoId>,
) -> ApiResult<Json<DeleteResponse>> {
    let (video, variants) = state
        .store
        .delete_video(video_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("video {video_id}")))?;

    let mut report = state.lifecycle.video_deleted(&video).await;
    for variant in &variants {
        let cleanup = state.lifecycle.variant_deleted(variant).await;
        report.removed += cleanup.removed;
        report.failed += cleanup.failed;
    }

    metrics::record_video_deleted();
    info!(video_id = %video_id, variants = variants.len(), "Video deleted");

    Ok(Json(DeleteResponse {
        deleted: true,
        files_removed: report.removed,
        files_failed: report.failed,
    }))
}

/// `DELETE /api/videos/:id/variants/:variant_id`: drop one variant and its file.
pub async fn delete_variant(
    State(state): State<AppState>,
    Path((video_id, variant_id)): Path<(VideoId, VariantId)>,
) -> ApiResult<Json<DeleteResponse>> {
    let not_found = || ApiError::not_found(format!("variant {variant_id} of video {video_id}"));

    let variant = state.store.get_variant(variant_id).await?.ok_or_else(not_found)?;
    if variant.video_id != video_id {
        return Err(not_found());
    }

    let removed = state.store.delete_variant(variant_id).await?.ok_or_else(not_found)?;
    let report = state.lifecycle.variant_deleted(&removed).await;

    info!(video_id = %video_id, variant_id = %variant_id, "Variant deleted");
    Ok(Json(DeleteResponse {
        deleted: true,
        files_removed: report.removed,
        files_failed: report.failed,
    }))
}

async fn find_video(state: &AppState, video_id: VideoId) -> ApiResult<Video> {
    state
        .store
        .get_video(video_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("video {video_id}")))
}

async fn enqueue_encode(state: &AppState, video_id: VideoId) -> ApiResult<String> {
    let job = QueueJob::StartEncoding(StartEncodingJob::new(video_id));
    state.queue.push(&job).await?;
    metrics::record_job_enqueued(job.kind());
    Ok(job.job_id().to_string())
}

/// State of the newest variant of every resolution that has one.
fn resolution_statuses(variants: &[VideoVariant], marked: &HashSet<VariantId>) -> Vec<ResolutionStatus> {
    let mut latest: BTreeMap<Resolution, &VideoVariant> = BTreeMap::new();
    for variant in variants {
        latest.insert(variant.resolution, variant);
    }

    latest
        .into_values()
        .map(|v| ResolutionStatus {
            resolution: v.resolution,
            state: EncodeState::derive(Some(v), marked.contains(&v.id)),
            last_error: v.last_error.clone(),
            updated_at: v.created_at,
        })
        .collect()
}
