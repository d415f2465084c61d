//! The upload-to-storage pipeline.
//!
//! Cheap checks gate expensive ones: ownership, then size and type, and only
//! then temp files, subprocesses and storage writes. Every temporary file is a
//! `NamedTempFile` owned by the running request, so it is removed on every
//! exit path, including cancellation when the client disconnects.
//!
//! A stored object whose metadata update then fails is left orphaned; there
//! is no sweep for those yet.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::PipelineError,
    models::{
        asset::{SpooledVideo, UploadedAsset, extension_for},
        reference::StorageReference,
        video::{RawReference, VideoRecord, VideoResponse},
    },
    services::{
        keys,
        media::{Prober, Remuxer, classify_aspect},
        resolver::ReferenceResolver,
        storage_service::{BlobStore, StorageError, ThumbnailStore, open_for_upload},
        video_repository::VideoRepository,
    },
};

/// Per-class byte ceilings.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub thumbnail_max_bytes: u64,
    pub video_max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            thumbnail_max_bytes: 10 << 20,
            video_max_bytes: 1 << 30,
        }
    }
}

#[derive(Clone)]
pub struct IngestService {
    pub videos: Arc<dyn VideoRepository>,
    pub thumbnails: ThumbnailStore,
    pub blobs: Arc<dyn BlobStore>,
    pub remuxer: Arc<dyn Remuxer>,
    pub prober: Arc<dyn Prober>,
    pub resolver: ReferenceResolver,
    pub limits: UploadLimits,
    /// Directory for spooled and remuxed videos.
    pub scratch_dir: PathBuf,
}

impl IngestService {
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Load `video_id` and check that `user_id` owns it.
    pub async fn authorize(&self, video_id: Uuid, user_id: Uuid) -> Result<VideoRecord, PipelineError> {
        let video = self
            .videos
            .get_video(video_id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        if !video.is_owned_by(user_id) {
            warn!(%video_id, %user_id, "upload attempted by non-owner");
            return Err(PipelineError::Unauthorized);
        }
        Ok(video)
    }

    /// Read path: the record with freshly resolved URLs.
    pub async fn describe(&self, video_id: Uuid) -> Result<VideoResponse, PipelineError> {
        let video = self
            .videos
            .get_video(video_id)
            .await?
            .ok_or(PipelineError::NotFound)?;
        self.resolver.video_response(&video).await
    }

    /// Store an accepted thumbnail and point the record at it.
    pub async fn store_thumbnail(
        &self,
        video: VideoRecord,
        asset: UploadedAsset,
    ) -> Result<VideoResponse, PipelineError> {
        let file_name = keys::asset_file_name(extension_for(&asset.media_type));
        self.thumbnails
            .write(&file_name, &asset.bytes)
            .await
            .map_err(PipelineError::StorageWriteFailure)?;

        let reference: RawReference = StorageReference::Asset { file_name }.into();
        let video = self
            .videos
            .set_thumbnail_reference(video.id, &reference)
            .await?;
        info!(video_id = %video.id, size_bytes = asset.bytes.len(), "thumbnail stored");
        self.resolver.video_response(&video).await
    }

    /// Normalize, classify and upload a spooled video, then point the record
    /// at the stored object.
    pub async fn store_video(
        &self,
        video: VideoRecord,
        upload: SpooledVideo,
    ) -> Result<VideoResponse, PipelineError> {
        let start = Instant::now();
        let SpooledVideo {
            file: original,
            media_type,
            size_bytes,
        } = upload;

        let normalized = tempfile::Builder::new()
            .prefix("ingest-faststart-")
            .suffix(".mp4")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| PipelineError::StorageWriteFailure(StorageError::Io(e)))?;

        self.remuxer
            .remux(original.path(), normalized.path())
            .await
            .map_err(PipelineError::TranscodeFailure)?;
        drop(original);

        let bucket = classify_aspect(self.prober.as_ref(), normalized.path())
            .await
            .map_err(PipelineError::ProbeFailure)?;

        let key = keys::video_object_key(bucket);
        let file = open_for_upload(normalized.path())
            .await
            .map_err(PipelineError::StorageWriteFailure)?;
        self.blobs
            .put_file(&key, file, &media_type)
            .await
            .map_err(PipelineError::StorageWriteFailure)?;
        drop(normalized);

        // Only the video column is written; a thumbnail stored while this
        // upload ran must survive.
        let reference: RawReference = StorageReference::Indirect {
            namespace: self.blobs.namespace().to_string(),
            key: key.clone(),
        }
        .into();
        let video = self.videos.set_video_reference(video.id, &reference).await?;

        info!(
            video_id = %video.id,
            %bucket,
            key,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "video stored"
        );
        self.resolver.video_response(&video).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            aspect::AspectBucket,
            video::NewVideo,
        },
        services::{
            intake,
            media::{ProcessError, StreamInfo},
            storage_service::StorageResult,
            video_repository::{RepositoryError, RepositoryResult, SqliteVideoRepository},
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use futures::stream;
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tokio::io::AsyncReadExt;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRpixels";
    const MP4: &[u8] = b"\0\0\0\x18ftypisom\0\0\x02\0isomiso2\0\0\0\x08moov\0\0\0\x08mdat";

    #[derive(Default)]
    struct MemoryVideos(Mutex<HashMap<Uuid, VideoRecord>>);

    #[async_trait]
    impl VideoRepository for MemoryVideos {
        async fn get_video(&self, id: Uuid) -> RepositoryResult<Option<VideoRecord>> {
            Ok(self.0.lock().unwrap().get(&id).cloned())
        }

        async fn create_video(&self, new: NewVideo) -> RepositoryResult<VideoRecord> {
            let video = VideoRecord {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                title: new.title,
                description: new.description,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                thumbnail_reference: None,
                video_reference: None,
            };
            self.0.lock().unwrap().insert(video.id, video.clone());
            Ok(video)
        }

        async fn set_thumbnail_reference(
            &self,
            id: Uuid,
            reference: &RawReference,
        ) -> RepositoryResult<VideoRecord> {
            let mut rows = self.0.lock().unwrap();
            let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
            row.thumbnail_reference = Some(reference.clone());
            row.updated_at = Utc::now();
            Ok(row.clone())
        }

        async fn set_video_reference(
            &self,
            id: Uuid,
            reference: &RawReference,
        ) -> RepositoryResult<VideoRecord> {
            let mut rows = self.0.lock().unwrap();
            let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
            row.video_reference = Some(reference.clone());
            row.updated_at = Utc::now();
            Ok(row.clone())
        }
    }

    /// Keeps uploaded objects in memory.
    #[derive(Default)]
    struct MemoryBlobs {
        objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
        fail_put: bool,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        fn namespace(&self) -> &str {
            "media"
        }

        async fn put_file(&self, key: &str, mut file: tokio::fs::File, ct: &str) -> StorageResult<()> {
            if self.fail_put {
                return Err(StorageError::Upload("connection reset".into()));
            }
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (buf, ct.to_string()));
            Ok(())
        }

        async fn presign(&self, namespace: &str, key: &str, ttl: Duration) -> StorageResult<String> {
            Ok(format!("https://{namespace}.example/{key}?ttl={}", ttl.as_secs()))
        }
    }

    /// Copies input to output, counting calls.
    #[derive(Default)]
    struct CopyRemuxer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Remuxer for CopyRemuxer {
        async fn remux(&self, input: &Path, output: &Path) -> Result<(), ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProcessError::EmptyOutput("ffmpeg".into()));
            }
            tokio::fs::copy(input, output)
                .await
                .map(|_| ())
                .map_err(ProcessError::Other)
        }
    }

    struct FixedProber {
        width: u32,
        height: u32,
    }

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, _input: &Path) -> Result<Vec<StreamInfo>, ProcessError> {
            Ok(vec![StreamInfo {
                index: 0,
                codec_type: "video".into(),
                width: self.width,
                height: self.height,
            }])
        }
    }

    struct Harness {
        service: IngestService,
        videos: Arc<MemoryVideos>,
        blobs: Arc<MemoryBlobs>,
        remuxer: Arc<CopyRemuxer>,
        assets: tempfile::TempDir,
        scratch: tempfile::TempDir,
    }

    fn harness_with(blobs: MemoryBlobs, remuxer: CopyRemuxer, prober: FixedProber) -> Harness {
        let videos = Arc::new(MemoryVideos::default());
        let blobs = Arc::new(blobs);
        let remuxer = Arc::new(remuxer);
        let assets = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let service = IngestService {
            videos: videos.clone(),
            thumbnails: ThumbnailStore::new(assets.path()),
            blobs: blobs.clone(),
            remuxer: remuxer.clone(),
            prober: Arc::new(prober),
            resolver: ReferenceResolver::new(
                blobs.clone(),
                "http://localhost:8091",
                Duration::from_secs(300),
            ),
            limits: UploadLimits::default(),
            scratch_dir: scratch.path().to_path_buf(),
        };
        Harness {
            service,
            videos,
            blobs,
            remuxer,
            assets,
            scratch,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MemoryBlobs::default(),
            CopyRemuxer::default(),
            FixedProber {
                width: 1920,
                height: 1080,
            },
        )
    }

    impl Harness {
        async fn video_for(&self, user: Uuid) -> VideoRecord {
            self.videos
                .create_video(NewVideo {
                    user_id: user,
                    title: "t".into(),
                    description: "d".into(),
                })
                .await
                .unwrap()
        }

        async fn spool(&self, bytes: &'static [u8]) -> Result<SpooledVideo, PipelineError> {
            intake::spool_video_stream(
                stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(bytes))]),
                self.service.limits.video_max_bytes,
                self.scratch.path(),
            )
            .await
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().count() == 0
        }
    }

    #[tokio::test]
    async fn non_owner_is_rejected() {
        let h = harness();
        let video = h.video_for(Uuid::new_v4()).await;
        let err = h.service.authorize(video.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unauthorized));
    }

    #[tokio::test]
    async fn unknown_video_is_not_found() {
        let h = harness();
        let err = h
            .service
            .authorize(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound));
    }

    #[tokio::test]
    async fn thumbnail_is_stored_verbatim_and_referenced() {
        let h = harness();
        let user = Uuid::new_v4();
        let video = h.service.authorize(h.video_for(user).await.id, user).await.unwrap();

        let response = h
            .service
            .store_thumbnail(
                video.clone(),
                UploadedAsset {
                    bytes: Bytes::from_static(PNG),
                    media_type: "image/png".into(),
                },
            )
            .await
            .unwrap();

        let stored = h.videos.get_video(video.id).await.unwrap().unwrap();
        let Ok(StorageReference::Asset { file_name }) =
            stored.thumbnail_reference.as_ref().unwrap().parse()
        else {
            panic!("expected asset reference");
        };
        assert!(file_name.ends_with(".png"));
        assert_eq!(std::fs::read(h.assets.path().join(&file_name)).unwrap(), PNG);
        assert_eq!(
            response.thumbnail_url.unwrap(),
            format!("http://localhost:8091/assets/{file_name}")
        );
    }

    #[tokio::test]
    async fn identical_thumbnails_get_distinct_keys() {
        let h = harness();
        let user = Uuid::new_v4();
        let video = h.video_for(user).await;
        let asset = UploadedAsset {
            bytes: Bytes::from_static(PNG),
            media_type: "image/png".into(),
        };

        let first = h.service.store_thumbnail(video.clone(), asset.clone()).await.unwrap();
        let second = h.service.store_thumbnail(video, asset).await.unwrap();

        assert_ne!(first.thumbnail_url, second.thumbnail_url);
        assert_eq!(std::fs::read_dir(h.assets.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn video_is_normalized_classified_and_uploaded() {
        let h = harness();
        let user = Uuid::new_v4();
        let video = h.video_for(user).await;
        let upload = h.spool(MP4).await.unwrap();

        let response = h.service.store_video(video.clone(), upload).await.unwrap();

        let objects = h.blobs.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        let (key, (bytes, content_type)) = objects.iter().next().unwrap();
        assert!(key.starts_with("landscape/") && key.ends_with(".mp4"));
        assert_eq!(bytes.as_slice(), MP4);
        assert_eq!(content_type, "video/mp4");

        let stored = h.videos.get_video(video.id).await.unwrap().unwrap();
        assert_eq!(
            stored.video_reference,
            Some(RawReference::from(format!("media,{key}")))
        );
        assert!(response.video_url.unwrap().contains(key.as_str()));
        assert_eq!(h.remuxer.calls.load(Ordering::SeqCst), 1);
        assert!(h.scratch_is_empty());
    }

    #[tokio::test]
    async fn portrait_videos_get_portrait_prefix() {
        let h = harness_with(
            MemoryBlobs::default(),
            CopyRemuxer::default(),
            FixedProber {
                width: 1080,
                height: 1920,
            },
        );
        let video = h.video_for(Uuid::new_v4()).await;
        h.service
            .store_video(video, h.spool(MP4).await.unwrap())
            .await
            .unwrap();
        let objects = h.blobs.objects.lock().unwrap();
        let key = objects.keys().next().unwrap();
        assert!(key.starts_with(&format!("{}/", AspectBucket::Portrait)));
    }

    #[tokio::test]
    async fn same_video_twice_gets_two_objects() {
        let h = harness();
        let video = h.video_for(Uuid::new_v4()).await;
        let first = h
            .service
            .store_video(video.clone(), h.spool(MP4).await.unwrap())
            .await
            .unwrap();
        let second = h
            .service
            .store_video(video, h.spool(MP4).await.unwrap())
            .await
            .unwrap();
        assert_ne!(first.video_url, second.video_url);
        assert_eq!(h.blobs.objects.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transcode_failure_cleans_up_and_stores_nothing() {
        let h = harness_with(
            MemoryBlobs::default(),
            CopyRemuxer {
                fail: true,
                ..Default::default()
            },
            FixedProber {
                width: 1920,
                height: 1080,
            },
        );
        let video = h.video_for(Uuid::new_v4()).await;
        let err = h
            .service
            .store_video(video.clone(), h.spool(MP4).await.unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::TranscodeFailure(_)));
        assert!(h.scratch_is_empty());
        assert!(h.blobs.objects.lock().unwrap().is_empty());
        let stored = h.videos.get_video(video.id).await.unwrap().unwrap();
        assert!(stored.video_reference.is_none());
    }

    #[tokio::test]
    async fn storage_failure_cleans_up_and_leaves_record_alone() {
        let h = harness_with(
            MemoryBlobs {
                fail_put: true,
                ..Default::default()
            },
            CopyRemuxer::default(),
            FixedProber {
                width: 1920,
                height: 1080,
            },
        );
        let video = h.video_for(Uuid::new_v4()).await;
        let err = h
            .service
            .store_video(video.clone(), h.spool(MP4).await.unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StorageWriteFailure(_)));
        assert!(h.scratch_is_empty());
        let stored = h.videos.get_video(video.id).await.unwrap().unwrap();
        assert!(stored.video_reference.is_none());
    }

    #[tokio::test]
    async fn rejected_type_never_reaches_remuxer() {
        let h = harness();
        let err = h.spool(PNG).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMediaType(_)));
        assert!(h.scratch_is_empty());
        assert_eq!(h.remuxer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn describe_resolves_fresh_urls() {
        let h = harness();
        let video = h.video_for(Uuid::new_v4()).await;
        h.videos
            .set_video_reference(video.id, &RawReference::from("media,other/k.mp4".to_string()))
            .await
            .unwrap();

        let response = h.service.describe(video.id).await.unwrap();
        assert_eq!(
            response.video_url.as_deref(),
            Some("https://media.example/other/k.mp4?ttl=300")
        );
    }

    async fn sqlite_videos() -> Arc<SqliteVideoRepository> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        Arc::new(SqliteVideoRepository::new(Arc::new(pool)))
    }

    #[tokio::test]
    async fn video_write_back_keeps_thumbnail_stored_meanwhile() {
        let h = harness();
        let videos = sqlite_videos().await;
        let service = IngestService {
            videos: videos.clone(),
            ..h.service.clone()
        };
        let user = Uuid::new_v4();
        let created = videos
            .create_video(NewVideo {
                user_id: user,
                title: "t".into(),
                description: "d".into(),
            })
            .await
            .unwrap();

        // Both uploads authorize before either finishes.
        let for_video = service.authorize(created.id, user).await.unwrap();
        let for_thumbnail = service.authorize(created.id, user).await.unwrap();

        service
            .store_thumbnail(
                for_thumbnail,
                UploadedAsset {
                    bytes: Bytes::from_static(PNG),
                    media_type: "image/png".into(),
                },
            )
            .await
            .unwrap();
        let response = service
            .store_video(for_video, h.spool(MP4).await.unwrap())
            .await
            .unwrap();

        let stored = videos.get_video(created.id).await.unwrap().unwrap();
        assert!(stored.thumbnail_reference.is_some());
        assert!(stored.video_reference.is_some());
        assert!(response.thumbnail_url.is_some());
        assert!(response.video_url.is_some());
    }
}
