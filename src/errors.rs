use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

use crate::{
    models::reference::ReferenceParseError,
    services::{
        media::ProcessError, storage_service::StorageError, video_repository::RepositoryError,
    },
};

/// Every way an upload or a read of a video's assets can fail.
///
/// The `Display` text is what the client sees. Underlying causes are kept as
/// `#[source]` so they reach the logs without leaking paths or credentials.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("missing or invalid credentials")]
    Unauthenticated,
    #[error("you can't modify this video")]
    Unauthorized,
    #[error("video not found")]
    NotFound,
    #[error("failed to prepare video for streaming")]
    TranscodeFailure(#[source] ProcessError),
    #[error("failed to inspect video geometry")]
    ProbeFailure(#[source] ProcessError),
    #[error("failed to store uploaded asset")]
    StorageWriteFailure(#[source] StorageError),
    #[error("failed to resolve asset reference")]
    ReferenceResolutionFailure(#[source] ResolveError),
    #[error("metadata store unavailable")]
    Metadata(#[from] RepositoryError),
}

/// Why a persisted reference could not be turned into a URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Parse(#[from] ReferenceParseError),
    #[error(transparent)]
    Sign(#[from] StorageError),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::UnsupportedMediaType(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TranscodeFailure(_)
            | Self::ProbeFailure(_)
            | Self::StorageWriteFailure(_)
            | Self::ReferenceResolutionFailure(_)
            | Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned to HTTP clients: a status and a message, nothing else.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = ?err, "request failed");
        } else {
            tracing::debug!(error = %err, "request rejected");
        }
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "unexpected failure");
        AppError::internal("internal server error")
    }
}
