#![deny(clippy::all)]

pub mod brand;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod video_dedup;

pub use config::{DedupConfig, MissingSignalPolicy};
pub use error::{DedupError, Result};
pub use video_dedup::{
    DedupOutcome, Fingerprint, FingerprintIndex, FrameHasher, FrameSampler, SampledFrame,
    SharedDeduplicator, VideoDeduplicator, VideoReference,
};

#[cfg(feature = "ffmpeg")]
pub use video_dedup::FfmpegDecoder;

#[cfg(feature = "napi")]
mod node {
    use napi::bindgen_prelude::*;
    use napi_derive::napi;
    use std::path::Path;

    use crate::config::DedupConfig;
    use crate::video_dedup::{
        DedupOutcome, FfmpegDecoder, SharedDeduplicator, VideoDeduplicator, VideoReference,
    };

    #[napi(object)]
    #[derive(Debug, Clone, Default)]
    pub struct JsDedupOptions {
        pub threshold: Option<u32>,
        pub frame_count: Option<u32>,
    }

    #[napi(object)]
    #[derive(Debug, Clone)]
    pub struct JsDedupResult {
        pub is_duplicate: bool,
        pub matched_reference: Option<String>,
        pub distance: Option<u32>,
        pub status: String,
    }

    impl From<DedupOutcome> for JsDedupResult {
        fn from(outcome: DedupOutcome) -> Self {
            let is_duplicate = outcome.is_duplicate();
            match outcome {
                DedupOutcome::Unique => Self {
                    is_duplicate,
                    matched_reference: None,
                    distance: None,
                    status: "unique".to_string(),
                },
                DedupOutcome::Duplicate { original, distance } => Self {
                    is_duplicate,
                    matched_reference: Some(original.to_string()),
                    distance: Some(distance),
                    status: "duplicate".to_string(),
                },
                DedupOutcome::NoSignal { .. } => Self {
                    is_duplicate,
                    matched_reference: None,
                    distance: None,
                    status: "no_signal".to_string(),
                },
            }
        }
    }

    #[napi(js_name = "VideoDeduplicator")]
    pub struct JsVideoDeduplicator {
        inner: SharedDeduplicator<FfmpegDecoder>,
    }

    #[napi]
    impl JsVideoDeduplicator {
        #[napi(constructor)]
        pub fn new(options: Option<JsDedupOptions>) -> Result<Self> {
            let options = options.unwrap_or_default();
            let mut config = DedupConfig::default();
            if let Some(threshold) = options.threshold {
                config.threshold = threshold;
            }
            if let Some(frame_count) = options.frame_count {
                config.frame_count = frame_count as usize;
            }

            let dedup = VideoDeduplicator::with_ffmpeg(&config)
                .map_err(|e| Error::from_reason(e.to_string()))?;

            Ok(Self {
                inner: SharedDeduplicator::new(dedup),
            })
        }

        #[napi]
        pub fn check_and_register(
            &self,
            video_path: String,
            reference: String,
        ) -> Result<JsDedupResult> {
            self.inner
                .check_and_register(Path::new(&video_path), VideoReference::new(reference))
                .map(JsDedupResult::from)
                .map_err(|e| Error::from_reason(e.to_string()))
        }

        #[napi]
        pub fn len(&self) -> u32 {
            self.inner.len() as u32
        }

        #[napi]
        pub fn is_empty(&self) -> bool {
            self.inner.is_empty()
        }

        #[napi]
        pub fn clear(&self) {
            self.inner.clear();
        }
    }
}
