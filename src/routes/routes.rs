//! Routes for uploads, reads and health.
//!
//! - `POST /api/thumbnail_upload/{video_id}`: store a thumbnail for a video
//! - `POST /api/video_upload/{video_id}`: normalize and store a video
//! - `GET  /api/videos/{video_id}`: video metadata with resolved URLs
//! - `GET  /assets/{file_name}`: locally stored thumbnails
//! - `GET  /healthz`, `GET /readyz`

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    handlers::{
        asset_handlers::get_asset,
        health_handlers::{healthz, readyz},
        upload_handlers::{upload_thumbnail, upload_video},
        video_handlers::get_video,
    },
    state::AppState,
};

/// Build the router. Upload routes lift axum's default body limit; intake
/// enforces the per-class ceilings while streaming.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/api/thumbnail_upload/{video_id}",
            post(upload_thumbnail).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/video_upload/{video_id}",
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/videos/{video_id}", get(get_video))
        .route("/assets/{file_name}", get(get_asset))
        .layer(TraceLayer::new_for_http())
}
