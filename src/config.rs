use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};

pub const DEFAULT_FRAME_COUNT: usize = 3;
pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_GRID_SIZE: u32 = 8;
/// Upper bound on frames sampled per video.
pub const MAX_FRAME_COUNT: usize = 256;

/// What to report when no fingerprint can be computed for a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSignalPolicy {
    /// Let the video through as not-a-duplicate.
    #[default]
    Accept,
    /// Drop the video as if it were a duplicate.
    Reject,
    /// Let the video through but hold it for manual review.
    Quarantine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Frames sampled per video
    pub frame_count: usize,
    /// Maximum Hamming distance still treated as the same content
    pub threshold: u32,
    pub hash_grid_width: u32,
    pub hash_grid_height: u32,
    pub on_missing_signal: MissingSignalPolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            threshold: DEFAULT_THRESHOLD,
            hash_grid_width: DEFAULT_GRID_SIZE,
            hash_grid_height: DEFAULT_GRID_SIZE,
            on_missing_signal: MissingSignalPolicy::default(),
        }
    }
}

impl DedupConfig {
    /// Layer an optional TOML file and `VIDDEDUP_*` environment variables
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("viddedup").required(false));
        }

        let conf = builder
            .add_source(Environment::with_prefix("VIDDEDUP").try_parsing(true))
            .build()?;

        let loaded: Self = conf.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(DedupError::InvalidConfig(
                "frame_count must be at least 1".to_string(),
            ));
        }
        if self.frame_count > MAX_FRAME_COUNT {
            return Err(DedupError::InvalidConfig(format!(
                "frame_count must be at most {}, got {}",
                MAX_FRAME_COUNT, self.frame_count
            )));
        }
        validate_grid(self.hash_grid_width, self.hash_grid_height)
    }

    pub fn fingerprint_bits(&self) -> usize {
        (self.hash_grid_width * self.hash_grid_height) as usize
    }
}

pub(crate) fn validate_grid(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(DedupError::InvalidConfig(format!(
            "hash grid must be non-empty, got {}x{}",
            width, height
        )));
    }
    Ok(())
}
