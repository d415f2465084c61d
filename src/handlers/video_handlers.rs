//! Read path for video metadata.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    errors::AppError, handlers::upload_handlers::parse_video_id, models::video::VideoResponse,
    state::AppState,
};

/// `GET /api/videos/{video_id}`
///
/// Asset references are resolved on every call, so the returned video URL
/// is always freshly signed.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoResponse>, AppError> {
    let video_id = parse_video_id(&video_id)?;
    Ok(Json(state.ingest.describe(video_id).await?))
}
