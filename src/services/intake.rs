//! Upload intake and the content-type gate.
//!
//! Payloads are read as a stream and counted as they arrive; a request is cut
//! off as soon as it crosses its class's ceiling. The media type is sniffed
//! from the leading bytes, never taken from the client.
//!
//! Videos are gated on a short prefix before the spool file is created, so a
//! rejected upload never touches the filesystem.

use axum::extract::Multipart;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::{fmt::Display, path::Path};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    errors::PipelineError,
    models::asset::{AssetClass, SpooledVideo, UploadedAsset},
    services::storage_service::StorageError,
};

/// Bytes inspected when sniffing a payload's type.
pub const SNIFF_LEN: usize = 512;

const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Running byte count that fails once `limit` is exceeded.
#[derive(Debug)]
pub struct ByteCeiling {
    limit: u64,
    seen: u64,
}

impl ByteCeiling {
    pub fn new(limit: u64) -> Self {
        Self { limit, seen: 0 }
    }

    pub fn admit(&mut self, len: usize) -> Result<(), PipelineError> {
        self.seen = self.seen.saturating_add(len as u64);
        if self.seen > self.limit {
            return Err(PipelineError::PayloadTooLarge { limit: self.limit });
        }
        Ok(())
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// Media type inferred from magic bytes.
pub fn sniff_media_type(prefix: &[u8]) -> String {
    infer::get(prefix)
        .map(|kind| kind.mime_type())
        .unwrap_or(UNKNOWN_MEDIA_TYPE)
        .to_string()
}

/// Strip parameters and whitespace, lowercase.
pub fn normalize_media_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Check a sniffed type against the class allow-list.
///
/// Returns the normalized type on success.
pub fn check_media_type(class: AssetClass, sniffed: &str) -> Result<String, PipelineError> {
    let normalized = normalize_media_type(sniffed);
    if class.allowed_media_types().contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(PipelineError::UnsupportedMediaType(normalized))
    }
}

fn stream_failed(err: impl Display) -> PipelineError {
    PipelineError::MalformedRequest(format!("upload stream interrupted: {err}"))
}

fn missing_field(class: AssetClass) -> PipelineError {
    PipelineError::MalformedRequest(format!("missing form field `{}`", class.field_name()))
}

fn multipart_failed(err: impl Display) -> PipelineError {
    PipelineError::MalformedRequest(format!("invalid multipart body: {err}"))
}

/// Buffer a whole payload in memory, enforcing `limit` as chunks arrive,
/// then sniff and gate it.
pub async fn read_asset<S, E>(
    stream: S,
    class: AssetClass,
    limit: u64,
) -> Result<UploadedAsset, PipelineError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut ceiling = ByteCeiling::new(limit);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(stream_failed)?;
        ceiling.admit(chunk.len())?;
        buf.extend_from_slice(&chunk);
    }

    let media_type = check_media_type(class, &sniff_media_type(&buf))?;
    Ok(UploadedAsset {
        bytes: buf.freeze(),
        media_type,
    })
}

/// Stream a video payload into a fresh temporary file under `scratch_dir`.
///
/// Only the first [`SNIFF_LEN`] bytes are held in memory before the type is
/// gated. The temp file is removed if anything fails after it is created.
pub async fn spool_video_stream<S, E>(
    stream: S,
    limit: u64,
    scratch_dir: &Path,
) -> Result<SpooledVideo, PipelineError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut ceiling = ByteCeiling::new(limit);
    let mut head = BytesMut::with_capacity(SNIFF_LEN);
    while head.len() < SNIFF_LEN {
        match stream.next().await {
            Some(chunk) => {
                let chunk = chunk.map_err(stream_failed)?;
                ceiling.admit(chunk.len())?;
                head.extend_from_slice(&chunk);
            }
            None => break,
        }
    }

    let media_type = check_media_type(AssetClass::Video, &sniff_media_type(&head))?;

    let spool = tempfile::Builder::new()
        .prefix("ingest-")
        .suffix(".mp4")
        .tempfile_in(scratch_dir)
        .map_err(|err| PipelineError::StorageWriteFailure(StorageError::Io(err)))?;
    let handle = spool
        .reopen()
        .map_err(|err| PipelineError::StorageWriteFailure(StorageError::Io(err)))?;
    let mut out = File::from_std(handle);

    let write_failed = |err| PipelineError::StorageWriteFailure(StorageError::Io(err));
    out.write_all(&head).await.map_err(write_failed)?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(stream_failed)?;
        ceiling.admit(chunk.len())?;
        out.write_all(&chunk).await.map_err(write_failed)?;
    }
    out.flush().await.map_err(write_failed)?;

    tracing::debug!(size_bytes = ceiling.seen(), "video spooled");
    Ok(SpooledVideo {
        file: spool,
        media_type,
        size_bytes: ceiling.seen(),
    })
}

/// Drain a field the caller has no use for, charging its bytes to `ceiling`.
///
/// Skipped fields share one ceiling per request, so leading junk cannot
/// stream unbounded data through the handler.
pub async fn skip_field<S, E>(stream: S, ceiling: &mut ByteCeiling) -> Result<(), PipelineError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        ceiling.admit(chunk.map_err(stream_failed)?.len())?;
    }
    Ok(())
}

/// Read the `thumbnail` field of a multipart body.
pub async fn read_thumbnail(
    multipart: &mut Multipart,
    limit: u64,
) -> Result<UploadedAsset, PipelineError> {
    let class = AssetClass::Thumbnail;
    let mut skipped = ByteCeiling::new(limit);
    while let Some(field) = multipart.next_field().await.map_err(multipart_failed)? {
        if field.name() == Some(class.field_name()) {
            return read_asset(field, class, limit).await;
        }
        skip_field(field, &mut skipped).await?;
    }
    Err(missing_field(class))
}

/// Spool the `video` field of a multipart body to disk.
pub async fn spool_video(
    multipart: &mut Multipart,
    limit: u64,
    scratch_dir: &Path,
) -> Result<SpooledVideo, PipelineError> {
    let class = AssetClass::Video;
    let mut skipped = ByteCeiling::new(limit);
    while let Some(field) = multipart.next_field().await.map_err(multipart_failed)? {
        if field.name() == Some(class.field_name()) {
            return spool_video_stream(field, limit, scratch_dir).await;
        }
        skip_field(field, &mut skipped).await?;
    }
    Err(missing_field(class))
}
