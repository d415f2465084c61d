//! Read-only serving of locally stored thumbnails.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

use crate::{
    errors::AppError, models::asset::media_type_for_file, services::storage_service::StorageError,
    state::AppState,
};

/// `GET /assets/{file_name}`, streamed from the asset root.
pub async fn get_asset(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = match state.ingest.thumbnails.open(&file_name).await {
        Ok(found) => found,
        Err(StorageError::InvalidName(_) | StorageError::AssetNotFound(_)) => {
            return Err(AppError::new(StatusCode::NOT_FOUND, "asset not found"));
        }
        Err(err) => {
            tracing::error!(file_name, error = %err, "could not open asset");
            return Err(AppError::internal("could not read asset"));
        }
    };

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media_type_for_file(&file_name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
