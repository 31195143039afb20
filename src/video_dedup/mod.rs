pub mod dedup;
pub mod hash;
pub mod index;
pub mod video;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use dedup::{DedupOutcome, SharedDeduplicator, VideoDeduplicator};
pub use hash::{Fingerprint, FrameHasher};
pub use index::{FingerprintIndex, Match};
pub use video::{FrameSampler, FrameSource, VideoDecoder, sample_positions};

#[cfg(feature = "ffmpeg")]
pub use video::{FfmpegDecoder, FfmpegVideo};

/// Opaque identifier for a video, usually its file path or a content key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoReference(String);

impl VideoReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoReference {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VideoReference {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A decoded still taken at a frame index of a video
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub position: u64,
    pub image: image::RgbImage,
}
