//! Coarse width:height classification used to prefix video object keys.

use serde::{Deserialize, Serialize};
use std::fmt;

const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;
/// Relative tolerance around each reference ratio.
const TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectBucket {
    Landscape,
    Portrait,
    Other,
}

impl AspectBucket {
    /// Classify pixel dimensions. Zero in either dimension is `Other`.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::Other;
        }
        let ratio = f64::from(width) / f64::from(height);
        if within_band(ratio, LANDSCAPE_RATIO) {
            Self::Landscape
        } else if within_band(ratio, PORTRAIT_RATIO) {
            Self::Portrait
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Other => "other",
        }
    }
}

fn within_band(ratio: f64, reference: f64) -> bool {
    reference * (1.0 - TOLERANCE) < ratio && ratio < reference * (1.0 + TOLERANCE)
}

impl fmt::Display for AspectBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
