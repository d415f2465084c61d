//! src/services/storage_service.rs
//!
//! Durable homes for accepted uploads. Thumbnails are written to the local
//! asset root, which is served read-only under `/assets/`. Videos are
//! streamed to a remote object store and read back through presigned URLs.

use async_trait::async_trait;
use http::Method;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore,
    aws::{AmazonS3, AmazonS3Builder},
    buffered::BufWriter,
    path::Path as ObjectPath,
    signer::Signer,
};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid asset name `{0}`")]
    InvalidName(String),
    #[error("asset `{0}` not found")]
    AssetNotFound(String),
    #[error("object store configuration: {0}")]
    Config(String),
    #[error("object upload failed: {0}")]
    Upload(String),
    #[error("presigning failed: {0}")]
    Presign(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Writes thumbnails under a local directory.
///
/// Files are written to a hidden temp name, synced, then renamed into
/// place, so a half-written file is never reachable under its final name.
#[derive(Clone, Debug)]
pub struct ThumbnailStore {
    /// Root directory served under `/assets/`.
    pub base_path: PathBuf,
}

impl ThumbnailStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Only bare generated names are accepted: no separators, no traversal.
    fn ensure_name_safe(&self, file_name: &str) -> StorageResult<()> {
        let valid = !file_name.is_empty()
            && !file_name.starts_with('.')
            && file_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidName(file_name.to_string()))
        }
    }

    pub fn asset_path(&self, file_name: &str) -> PathBuf {
        self.base_path.join(file_name)
    }

    /// Persist `data` as `file_name`.
    pub async fn write(&self, file_name: &str, data: &[u8]) -> StorageResult<PathBuf> {
        self.ensure_name_safe(file_name)?;
        let start = Instant::now();
        fs::create_dir_all(&self.base_path).await?;

        let final_path = self.asset_path(file_name);
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        info!(
            file_name,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "thumbnail written"
        );
        Ok(final_path)
    }

    /// Open a stored thumbnail for reading, with its size in bytes.
    pub async fn open(&self, file_name: &str) -> StorageResult<(File, u64)> {
        self.ensure_name_safe(file_name)?;
        let file = File::open(self.asset_path(file_name))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::AssetNotFound(file_name.to_string())
                } else {
                    StorageError::Io(err)
                }
            })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Best-effort write/read/delete probe used by the readiness check.
    pub async fn probe_writable(&self) -> Result<(), String> {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let outcome = match fs::write(&tmp_path, b"readyz").await {
            Ok(()) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => Ok(()),
                Ok(_) => Err("file content mismatch".to_string()),
                Err(e) => Err(format!("could not read tmp file: {e}")),
            },
            Err(e) => return Err(format!("could not write tmp file: {e}")),
        };
        if let Err(err) = fs::remove_file(&tmp_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("could not remove readiness probe {}: {}", tmp_path.display(), err);
            }
        }
        outcome
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Remote object storage: upload and time-limited read access.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket that [`BlobStore::put_file`] writes into.
    fn namespace(&self) -> &str;

    /// Upload the whole of `file`, starting from its current position, as
    /// `key`. The object must not become visible unless this returns `Ok`.
    async fn put_file(&self, key: &str, file: File, content_type: &str) -> StorageResult<()>;

    /// Signed GET URL for `key` in `namespace`, valid for `ttl`.
    async fn presign(&self, namespace: &str, key: &str, ttl: Duration) -> StorageResult<String>;
}

/// Open `path` for upload, explicitly positioned at the first byte.
pub async fn open_for_upload(path: &Path) -> StorageResult<File> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok(file)
}

/// S3 (or S3-compatible) object storage through `object_store`.
#[derive(Clone)]
pub struct S3BlobStore {
    store: Arc<AmazonS3>,
    /// Builder without a bucket, used to sign URLs for other namespaces.
    builder: AmazonS3Builder,
    bucket: String,
}

impl S3BlobStore {
    /// Credentials come from the environment (`AWS_ACCESS_KEY_ID`, ...).
    /// `endpoint_url` selects an S3-compatible provider such as MinIO.
    pub fn new(bucket: String, region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env().with_region(region);
        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .clone()
            .with_bucket_name(bucket.clone())
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            builder,
            bucket,
        })
    }

    fn signer_for(&self, namespace: &str) -> StorageResult<Arc<AmazonS3>> {
        if namespace == self.bucket {
            return Ok(self.store.clone());
        }
        self.builder
            .clone()
            .with_bucket_name(namespace)
            .build()
            .map(Arc::new)
            .map_err(|e| StorageError::Config(e.to_string()))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn namespace(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, mut file: File, content_type: &str) -> StorageResult<()> {
        let start = Instant::now();
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );

        let store: Arc<dyn ObjectStore> = self.store.clone();
        let mut writer =
            BufWriter::new(store, ObjectPath::from(key.to_string())).with_attributes(attributes);

        let copied = match tokio::io::copy(&mut file, &mut writer).await {
            Ok(n) => n,
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    debug!(key, error = %abort_err, "aborting partial upload failed");
                }
                error!(bucket = %self.bucket, key, error = %e, "S3 upload failed");
                return Err(StorageError::Upload(e.to_string()));
            }
        };

        // Completing the multipart upload is what makes the object visible.
        if let Err(e) = writer.shutdown().await {
            error!(bucket = %self.bucket, key, error = %e, "S3 upload completion failed");
            return Err(StorageError::Upload(e.to_string()));
        }

        info!(
            bucket = %self.bucket,
            key,
            size_bytes = copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        Ok(())
    }

    async fn presign(&self, namespace: &str, key: &str, ttl: Duration) -> StorageResult<String> {
        let signer = self.signer_for(namespace)?;
        let url = signer
            .signed_url(Method::GET, &ObjectPath::from(key.to_string()), ttl)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        Ok(url.to_string())
    }
}
