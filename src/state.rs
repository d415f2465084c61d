//! Shared handler state.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{auth::TokenVerifier, services::ingest_service::IngestService};

#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Pool behind the video repository, checked by `/readyz`.
    pub db: Arc<SqlitePool>,
}
