//! Request-scoped upload payloads.

use bytes::Bytes;
use tempfile::NamedTempFile;

/// The two kinds of upload the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Thumbnail,
    Video,
}

impl AssetClass {
    /// Multipart field carrying the payload.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Video => "video",
        }
    }

    /// Normalized media types accepted for this class.
    pub fn allowed_media_types(&self) -> &'static [&'static str] {
        match self {
            Self::Thumbnail => &["image/jpeg", "image/png"],
            Self::Video => &["video/mp4"],
        }
    }
}

/// A fully buffered upload. Lives only as long as its request.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub bytes: Bytes,
    pub media_type: String,
}

/// A video upload spooled to a temporary file.
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct SpooledVideo {
    pub file: NamedTempFile,
    pub media_type: String,
    pub size_bytes: u64,
}

/// File extension for a validated media type.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

/// Media type served for a stored file name, from its extension.
pub fn media_type_for_file(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
