//! Persisted pointers from a video record to its stored assets.
//!
//! Three encodings have been written to the `videos` table over time and all
//! of them must still be readable:
//!
//! - `data:<media_type>;base64,<payload>`: the asset itself, inline.
//! - `/assets/<file_name>`: a file under the local asset root.
//! - `<namespace>,<key>`: an object in remote storage. Not a URL;
//!   access URLs expire and are computed on every read.

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Path prefix under which the local asset root is served.
pub const ASSET_PATH_PREFIX: &str = "/assets/";

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageReference {
    /// Legacy inline asset.
    Embedded { media_type: String, data: Bytes },
    /// File named `file_name` under the local asset root.
    Asset { file_name: String },
    /// Object `key` inside bucket `namespace`.
    Indirect { namespace: String, key: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceParseError {
    #[error("embedded reference is not a base64 data URL")]
    MalformedDataUrl,
    #[error("embedded reference payload is not valid base64")]
    InvalidBase64,
    #[error("asset reference has an invalid file name")]
    InvalidAssetName,
    #[error("reference matches no known encoding")]
    Unrecognized,
}

impl StorageReference {
    /// Data URL for an inline asset.
    pub fn data_url(media_type: &str, data: &[u8]) -> String {
        format!(
            "{DATA_URL_PREFIX}{media_type}{BASE64_MARKER}{}",
            general_purpose::STANDARD.encode(data)
        )
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded { media_type, data } => {
                f.write_str(&Self::data_url(media_type, data))
            }
            Self::Asset { file_name } => write!(f, "{ASSET_PATH_PREFIX}{file_name}"),
            Self::Indirect { namespace, key } => write!(f, "{namespace},{key}"),
        }
    }
}

impl FromStr for StorageReference {
    type Err = ReferenceParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = raw.strip_prefix(DATA_URL_PREFIX) {
            let (media_type, payload) = rest
                .split_once(BASE64_MARKER)
                .ok_or(ReferenceParseError::MalformedDataUrl)?;
            if media_type.is_empty() {
                return Err(ReferenceParseError::MalformedDataUrl);
            }
            let data = general_purpose::STANDARD
                .decode(payload)
                .map_err(|_| ReferenceParseError::InvalidBase64)?;
            return Ok(Self::Embedded {
                media_type: media_type.to_string(),
                data: Bytes::from(data),
            });
        }

        if let Some(file_name) = raw.strip_prefix(ASSET_PATH_PREFIX) {
            if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
                return Err(ReferenceParseError::InvalidAssetName);
            }
            return Ok(Self::Asset {
                file_name: file_name.to_string(),
            });
        }

        match raw.split_once(',') {
            Some((namespace, key))
                if !namespace.is_empty()
                    && !key.is_empty()
                    && !key.contains(',')
                    && !namespace.contains(['/', ':']) =>
            {
                Ok(Self::Indirect {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                })
            }
            _ => Err(ReferenceParseError::Unrecognized),
        }
    }
}
