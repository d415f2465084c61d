//! Video metadata backed by SQLite.
//!
//! The pipeline reads one row per upload to check ownership and writes back
//! one reference column when the upload succeeds.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::video::{NewVideo, RawReference, VideoRecord, VideoRow};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("video `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get_video(&self, id: Uuid) -> RepositoryResult<Option<VideoRecord>>;

    /// Insert a fresh row with no references.
    ///
    /// Rows are provisioned outside the upload pipeline; this is the seam
    /// operators and the test harnesses use to seed them.
    async fn create_video(&self, new: NewVideo) -> RepositoryResult<VideoRecord>;

    /// Write the thumbnail column only, leaving `video_url` as stored.
    async fn set_thumbnail_reference(
        &self,
        id: Uuid,
        reference: &RawReference,
    ) -> RepositoryResult<VideoRecord>;

    /// Write the video column only, leaving `thumbnail_url` as stored.
    async fn set_video_reference(
        &self,
        id: Uuid,
        reference: &RawReference,
    ) -> RepositoryResult<VideoRecord>;
}

const VIDEO_COLUMNS: &str =
    "id, user_id, title, description, created_at, updated_at, thumbnail_url, video_url";

#[derive(Clone)]
pub struct SqliteVideoRepository {
    pub db: Arc<SqlitePool>,
}

impl SqliteVideoRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    // `column` is always one of the two literals below, never caller input.
    async fn set_reference(
        &self,
        column: &'static str,
        id: Uuid,
        reference: &RawReference,
    ) -> RepositoryResult<VideoRecord> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "UPDATE videos
             SET {column} = ?, updated_at = ?
             WHERE id = ?
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(reference.as_str())
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(VideoRecord::from)
            .ok_or(RepositoryError::NotFound(id))
    }
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn get_video(&self, id: Uuid) -> RepositoryResult<Option<VideoRecord>> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(VideoRecord::from))
    }

    async fn create_video(&self, new: NewVideo) -> RepositoryResult<VideoRecord> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "INSERT INTO videos (id, user_id, title, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        Ok(row.into())
    }

    async fn set_thumbnail_reference(
        &self,
        id: Uuid,
        reference: &RawReference,
    ) -> RepositoryResult<VideoRecord> {
        self.set_reference("thumbnail_url", id, reference).await
    }

    async fn set_video_reference(
        &self,
        id: Uuid,
        reference: &RawReference,
    ) -> RepositoryResult<VideoRecord> {
        self.set_reference("video_url", id, reference).await
    }
}
