//! HTTP handlers for thumbnail and video uploads.
//!
//! Each upload is checked for ownership before its body is read; the
//! multipart stream is consumed only once the caller may modify the video.

use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::{AppError, PipelineError},
    models::video::VideoResponse,
    services::intake,
    state::AppState,
};

/// Parse a `{video_id}` path segment.
pub fn parse_video_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::MalformedRequest(format!("invalid video id `{raw}`")))
}

/// `POST /api/thumbnail_upload/{video_id}` with a `thumbnail` form field.
pub async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<VideoResponse>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let video = state.ingest.authorize(video_id, user_id).await?;
    tracing::debug!(%video_id, %user_id, "uploading thumbnail");

    let limit = state.ingest.limits.thumbnail_max_bytes;
    let asset = intake::read_thumbnail(&mut multipart, limit).await?;
    let response = state.ingest.store_thumbnail(video, asset).await?;
    Ok(Json(response))
}

/// `POST /api/video_upload/{video_id}` with a `video` form field.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<VideoResponse>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    let video = state.ingest.authorize(video_id, user_id).await?;
    tracing::debug!(%video_id, %user_id, "uploading video");

    let limit = state.ingest.limits.video_max_bytes;
    let upload = intake::spool_video(&mut multipart, limit, state.ingest.scratch_dir()).await?;
    let response = state.ingest.store_video(video, upload).await?;
    Ok(Json(response))
}
