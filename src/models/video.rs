//! A video's metadata row and its client-facing representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::reference::{ReferenceParseError, StorageReference};

/// Raw `videos` row as stored in SQLite.
///
/// References are kept as text here; [`VideoRecord`] is the typed view.
#[derive(Clone, FromRow, Debug)]
pub struct VideoRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
}

/// A video owned by one user, with optional pointers to its stored assets.
///
/// Only the owning user may change the references.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub thumbnail_reference: Option<RawReference>,
    pub video_reference: Option<RawReference>,
}

/// A persisted reference that may or may not parse.
///
/// Rows written by older code are not guaranteed to be well formed; a bad one
/// must fail only the read that touches it, so parsing is deferred.
#[derive(Clone, Debug, PartialEq)]
pub struct RawReference(String);

impl RawReference {
    pub fn parse(&self) -> Result<StorageReference, ReferenceParseError> {
        self.0.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<StorageReference> for RawReference {
    fn from(reference: StorageReference) -> Self {
        Self(reference.to_string())
    }
}

impl From<String> for RawReference {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl VideoRecord {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

impl From<VideoRow> for VideoRecord {
    fn from(row: VideoRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            thumbnail_reference: row.thumbnail_url.map(RawReference::from),
            video_reference: row.video_url.map(RawReference::from),
        }
    }
}

/// Fields needed to create a video row.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVideo {
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
}

/// JSON body returned to clients, with references already resolved to URLs.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VideoResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
}
