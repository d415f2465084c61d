//! Turning persisted references into URLs a client can fetch.
//!
//! Signed URLs are recomputed on every read. Nothing is cached: a signed URL
//! is useless after it expires, while the record that points at the object
//! lives indefinitely.

use std::{sync::Arc, time::Duration};

use crate::{
    errors::{PipelineError, ResolveError},
    models::{
        reference::{ASSET_PATH_PREFIX, StorageReference},
        video::{RawReference, VideoRecord, VideoResponse},
    },
    services::storage_service::BlobStore,
};

#[derive(Clone)]
pub struct ReferenceResolver {
    blobs: Arc<dyn BlobStore>,
    /// Origin under which `/assets/` is served, without a trailing slash.
    public_base_url: String,
    presign_ttl: Duration,
}

impl ReferenceResolver {
    pub fn new(blobs: Arc<dyn BlobStore>, public_base_url: &str, presign_ttl: Duration) -> Self {
        Self {
            blobs,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            presign_ttl,
        }
    }

    pub async fn resolve(&self, reference: &StorageReference) -> Result<String, ResolveError> {
        match reference {
            StorageReference::Embedded { media_type, data } => {
                Ok(StorageReference::data_url(media_type, data))
            }
            StorageReference::Asset { file_name } => Ok(format!(
                "{}{ASSET_PATH_PREFIX}{file_name}",
                self.public_base_url
            )),
            StorageReference::Indirect { namespace, key } => Ok(self
                .blobs
                .presign(namespace, key, self.presign_ttl)
                .await?),
        }
    }

    async fn resolve_raw(&self, raw: &RawReference) -> Result<String, PipelineError> {
        let reference = raw
            .parse()
            .map_err(|e| PipelineError::ReferenceResolutionFailure(e.into()))?;
        self.resolve(&reference)
            .await
            .map_err(PipelineError::ReferenceResolutionFailure)
    }

    /// Client view of `video`, with both references resolved.
    ///
    /// Failure affects only this response; the record is not touched.
    pub async fn video_response(&self, video: &VideoRecord) -> Result<VideoResponse, PipelineError> {
        let thumbnail_url = match &video.thumbnail_reference {
            Some(raw) => Some(self.resolve_raw(raw).await?),
            None => None,
        };
        let video_url = match &video.video_reference {
            Some(raw) => Some(self.resolve_raw(raw).await?),
            None => None,
        };

        Ok(VideoResponse {
            id: video.id,
            user_id: video.user_id,
            title: video.title.clone(),
            description: video.description.clone(),
            created_at: video.created_at,
            updated_at: video.updated_at,
            thumbnail_url,
            video_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::{StorageError, StorageResult};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::fs::File;
    use uuid::Uuid;

    /// Signs by counting, so every call yields a distinct URL.
    #[derive(Default)]
    struct CountingSigner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BlobStore for CountingSigner {
        fn namespace(&self) -> &str {
            "media"
        }

        async fn put_file(&self, _key: &str, _file: File, _ct: &str) -> StorageResult<()> {
            unreachable!("resolver never uploads")
        }

        async fn presign(&self, namespace: &str, key: &str, ttl: Duration) -> StorageResult<String> {
            if self.fail {
                return Err(StorageError::Presign("no credentials".into()));
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "https://{namespace}.example/{key}?expires={}&sig={n}",
                ttl.as_secs()
            ))
        }
    }

    fn resolver(signer: Arc<CountingSigner>) -> ReferenceResolver {
        ReferenceResolver::new(signer, "http://localhost:8091/", Duration::from_secs(300))
    }

    fn record(thumbnail: Option<&str>, video: Option<&str>) -> VideoRecord {
        VideoRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "clip".into(),
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            thumbnail_reference: thumbnail.map(|s| RawReference::from(s.to_string())),
            video_reference: video.map(|s| RawReference::from(s.to_string())),
        }
    }

    #[tokio::test]
    async fn embedded_reference_becomes_data_url() {
        let r = resolver(Arc::default());
        let url = r
            .resolve(&StorageReference::Embedded {
                media_type: "image/png".into(),
                data: Bytes::from_static(b"\x89PNG"),
            })
            .await
            .unwrap();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[tokio::test]
    async fn asset_reference_becomes_served_path() {
        let r = resolver(Arc::default());
        let url = r
            .resolve(&StorageReference::Asset {
                file_name: "k.png".into(),
            })
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8091/assets/k.png");
    }

    #[tokio::test]
    async fn indirect_reference_is_signed_on_every_read() {
        let signer = Arc::new(CountingSigner::default());
        let r = resolver(signer.clone());
        let reference = StorageReference::Indirect {
            namespace: "media".into(),
            key: "landscape/k.mp4".into(),
        };

        let first = r.resolve(&reference).await.unwrap();
        let second = r.resolve(&reference).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("https://media.example/landscape/k.mp4?expires=300"));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn signing_failure_leaves_record_untouched() {
        let signer = Arc::new(CountingSigner {
            fail: true,
            ..Default::default()
        });
        let r = resolver(signer);
        let video = record(None, Some("media,portrait/k.mp4"));
        let before = video.clone();

        let err = r.video_response(&video).await.unwrap_err();

        assert!(matches!(err, PipelineError::ReferenceResolutionFailure(_)));
        assert_eq!(video, before);
    }

    #[tokio::test]
    async fn unparseable_reference_fails_only_the_read() {
        let r = resolver(Arc::default());
        let err = r
            .video_response(&record(Some("garbage"), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ReferenceResolutionFailure(ResolveError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn resolves_both_fields() {
        let r = resolver(Arc::default());
        let response = r
            .video_response(&record(
                Some("/assets/t.jpg"),
                Some("media,other/v.mp4"),
            ))
            .await
            .unwrap();
        assert_eq!(
            response.thumbnail_url.as_deref(),
            Some("http://localhost:8091/assets/t.jpg")
        );
        assert!(response.video_url.unwrap().contains("other/v.mp4"));
    }
}
