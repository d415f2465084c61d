//! Unguessable storage keys.
//!
//! Keys are independent of database ids so stored objects cannot be
//! enumerated or correlated with metadata. A locally served thumbnail's key
//! is also its only access control.

use base64::{Engine as _, engine::general_purpose};
use rand::{RngCore, rngs::OsRng};

use crate::models::aspect::AspectBucket;

/// Random bytes per key (256 bits).
pub const KEY_BYTES: usize = 32;

/// A fresh URL-safe token from the OS CSPRNG.
///
/// Panics only if the OS entropy source fails, which is unrecoverable.
pub fn generate_key() -> String {
    let mut buf = [0u8; KEY_BYTES];
    OsRng.fill_bytes(&mut buf);
    general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// `<key>.<extension>`, the on-disk name of a thumbnail.
pub fn asset_file_name(extension: &str) -> String {
    format!("{}.{}", generate_key(), extension)
}

/// `<bucket>/<key>.mp4`, the object-store key of a video.
pub fn video_object_key(bucket: AspectBucket) -> String {
    format!("{}/{}.mp4", bucket, generate_key())
}
