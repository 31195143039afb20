use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    Fingerprint, FingerprintIndex, FrameHasher, FrameSampler, Match, VideoDecoder, VideoReference,
};
use crate::config::{DedupConfig, MissingSignalPolicy};
use crate::error::Result;

/// Outcome of one `check_and_register` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DedupOutcome {
    /// Fingerprinted and registered as new content
    Unique,
    /// Within threshold of an earlier video; not registered
    Duplicate {
        original: VideoReference,
        distance: u32,
    },
    /// No frame could be sampled or hashed; nothing was registered
    NoSignal { policy: MissingSignalPolicy },
}

impl DedupOutcome {
    pub fn is_duplicate(&self) -> bool {
        match self {
            DedupOutcome::Unique => false,
            DedupOutcome::Duplicate { .. } => true,
            DedupOutcome::NoSignal { policy } => *policy == MissingSignalPolicy::Reject,
        }
    }

    pub fn matched_reference(&self) -> Option<&VideoReference> {
        match self {
            DedupOutcome::Duplicate { original, .. } => Some(original),
            _ => None,
        }
    }

    pub fn is_quarantined(&self) -> bool {
        matches!(
            self,
            DedupOutcome::NoSignal {
                policy: MissingSignalPolicy::Quarantine
            }
        )
    }

    /// The `(is_duplicate, matched_reference)` pair.
    pub fn as_tuple(&self) -> (bool, Option<&VideoReference>) {
        (self.is_duplicate(), self.matched_reference())
    }
}

/// Samples, fingerprints and deduplicates videos against a growing index.
pub struct VideoDeduplicator<D> {
    decoder: D,
    sampler: FrameSampler,
    hasher: FrameHasher,
    index: FingerprintIndex,
    threshold: u32,
    on_missing_signal: MissingSignalPolicy,
    quarantined: Vec<VideoReference>,
}

impl<D: VideoDecoder> VideoDeduplicator<D> {
    pub fn new(decoder: D, config: &DedupConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            decoder,
            sampler: FrameSampler::new(config.frame_count),
            hasher: FrameHasher::new(config.hash_grid_width, config.hash_grid_height)?,
            index: FingerprintIndex::new(),
            threshold: config.threshold,
            on_missing_signal: config.on_missing_signal,
            quarantined: Vec::new(),
        })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn index(&self) -> &FingerprintIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut FingerprintIndex {
        &mut self.index
    }

    /// Sample and hash a video without touching the index.
    pub fn fingerprint_video(&self, video_path: &Path) -> Option<Fingerprint> {
        let frames = self.sampler.sample(&self.decoder, video_path);
        if frames.is_empty() {
            return None;
        }
        self.hasher.fingerprint(&frames)
    }

    pub fn check_and_register(
        &mut self,
        video_path: &Path,
        reference: VideoReference,
    ) -> Result<DedupOutcome> {
        self.check_and_register_with_threshold(video_path, reference, self.threshold)
    }

    pub fn check_and_register_with_threshold(
        &mut self,
        video_path: &Path,
        reference: VideoReference,
        threshold: u32,
    ) -> Result<DedupOutcome> {
        let fingerprint = self.fingerprint_video(video_path);
        self.check_and_register_fingerprint(reference, fingerprint, threshold)
    }

    /// Decide on an already computed fingerprint. `None` means no signal.
    pub fn check_and_register_fingerprint(
        &mut self,
        reference: VideoReference,
        fingerprint: Option<Fingerprint>,
        threshold: u32,
    ) -> Result<DedupOutcome> {
        let Some(fingerprint) = fingerprint else {
            log::warn!(
                "No fingerprint for {}, applying {:?} policy",
                reference,
                self.on_missing_signal
            );
            if self.on_missing_signal == MissingSignalPolicy::Quarantine {
                self.quarantined.push(reference);
            }
            return Ok(DedupOutcome::NoSignal {
                policy: self.on_missing_signal,
            });
        };

        let registered = self
            .index
            .check_and_register(reference.clone(), fingerprint, threshold)?;
        let outcome = match registered {
            Match::Registered => {
                log::info!("Registered {} ({} known)", reference, self.index.len());
                DedupOutcome::Unique
            }
            Match::Duplicate { original, distance } => {
                log::info!(
                    "{} duplicates {} (distance {}, threshold {})",
                    reference,
                    original,
                    distance,
                    threshold
                );
                DedupOutcome::Duplicate { original, distance }
            }
        };

        Ok(outcome)
    }

    /// References held back under the quarantine policy since the last drain.
    pub fn quarantined(&self) -> &[VideoReference] {
        &self.quarantined
    }

    pub fn drain_quarantined(&mut self) -> Vec<VideoReference> {
        std::mem::take(&mut self.quarantined)
    }

    pub fn remove(&mut self, reference: &VideoReference) -> Option<Fingerprint> {
        self.index.remove(reference)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.quarantined.clear();
    }
}

#[cfg(feature = "ffmpeg")]
impl VideoDeduplicator<super::FfmpegDecoder> {
    /// Deduplicator backed by FFmpeg decoding of local files.
    pub fn with_ffmpeg(config: &DedupConfig) -> Result<Self> {
        let decoder = super::FfmpegDecoder::new()?;
        Self::new(decoder, config)
    }
}

/// A deduplicator safe to share between threads.
///
/// The lock is held for the whole sample, hash and compare-or-insert
/// sequence, so two similar videos checked concurrently cannot both be
/// registered.
pub struct SharedDeduplicator<D> {
    inner: Mutex<VideoDeduplicator<D>>,
}

impl<D: VideoDecoder> SharedDeduplicator<D> {
    pub fn new(deduplicator: VideoDeduplicator<D>) -> Self {
        Self {
            inner: Mutex::new(deduplicator),
        }
    }

    /// Lock the deduplicator. A poisoned lock is recovered: the index is
    /// only mutated by a single push or in-place assignment.
    pub fn lock(&self) -> MutexGuard<'_, VideoDeduplicator<D>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check_and_register(
        &self,
        video_path: &Path,
        reference: VideoReference,
    ) -> Result<DedupOutcome> {
        self.lock().check_and_register(video_path, reference)
    }

    pub fn check_and_register_with_threshold(
        &self,
        video_path: &Path,
        reference: VideoReference,
        threshold: u32,
    ) -> Result<DedupOutcome> {
        self.lock()
            .check_and_register_with_threshold(video_path, reference, threshold)
    }

    pub fn len(&self) -> usize {
        self.lock().index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn into_inner(self) -> VideoDeduplicator<D> {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
