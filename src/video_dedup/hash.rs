use anyhow::{Context, Result};
use img_hash::{HashAlg, HasherConfig, image as img_hash_image};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::SampledFrame;
use crate::config::{DEFAULT_GRID_SIZE, validate_grid};
use crate::error::DedupError;

/// Fixed-length bit vector summarising the visual content of a video.
///
/// Bit `i` lives in byte `i / 8` under mask `1 << (i % 8)`. Bits past
/// `bit_len` in the last byte are always zero. Deserialization rejects
/// payloads that break either rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFingerprint")]
pub struct Fingerprint {
    bits: Vec<u8>,
    bit_len: usize,
}

#[derive(Deserialize)]
struct RawFingerprint {
    bits: Vec<u8>,
    bit_len: usize,
}

impl TryFrom<RawFingerprint> for Fingerprint {
    type Error = DedupError;

    fn try_from(raw: RawFingerprint) -> Result<Self, DedupError> {
        if raw.bits.len() != raw.bit_len.div_ceil(8) {
            return Err(DedupError::MalformedFingerprint(format!(
                "{} bits need {} bytes, got {}",
                raw.bit_len,
                raw.bit_len.div_ceil(8),
                raw.bits.len()
            )));
        }

        let padding = raw.bit_len % 8;
        if let Some(last) = raw.bits.last()
            && padding != 0
            && *last >> padding != 0
        {
            return Err(DedupError::MalformedFingerprint(format!(
                "bits past bit {} are set",
                raw.bit_len
            )));
        }

        Ok(Self {
            bits: raw.bits,
            bit_len: raw.bit_len,
        })
    }
}

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: bytes.to_vec(),
            bit_len: bytes.len() * 8,
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, _) in bits.iter().enumerate().filter(|(_, set)| **set) {
            bytes[i / 8] |= 1 << (i % 8);
        }
        Self {
            bits: bytes,
            bit_len: bits.len(),
        }
    }

    /// Build a fingerprint from the low `bit_len` bits of `value`.
    ///
    /// A `u64` carries at most 64 bits, so a larger `bit_len` is clamped to 64
    /// and the result reports `bit_len() == 64`.
    pub fn from_u64(value: u64, bit_len: usize) -> Self {
        let bit_len = bit_len.min(64);
        let bools: Vec<bool> = (0..bit_len).map(|i| (value >> i) & 1 == 1).collect();
        Self::from_bools(&bools)
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.bit_len
            && self
                .bits
                .get(index / 8)
                .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    pub fn hamming_distance(&self, other: &Fingerprint) -> Result<u32, DedupError> {
        if self.bit_len != other.bit_len {
            return Err(DedupError::BitLengthMismatch {
                expected: self.bit_len,
                found: other.bit_len,
            });
        }

        let mut distance = 0u32;
        for (byte1, byte2) in self.bits.iter().zip(other.bits.iter()) {
            let xor = byte1 ^ byte2;

            distance += xor.count_ones();
        }

        Ok(distance)
    }

    /// Position-wise majority vote. A bit is set when it is set in at least
    /// half of the inputs, so ties round up.
    ///
    /// Returns `Ok(None)` for an empty slice.
    pub fn majority(hashes: &[Fingerprint]) -> Result<Option<Fingerprint>, DedupError> {
        let Some(first) = hashes.first() else {
            return Ok(None);
        };
        let bit_len = first.bit_len;

        let mut counts = vec![0usize; bit_len];
        for hash in hashes {
            if hash.bit_len != bit_len {
                return Err(DedupError::BitLengthMismatch {
                    expected: bit_len,
                    found: hash.bit_len,
                });
            }
            for (i, count) in counts.iter_mut().enumerate() {
                if hash.bit(i) {
                    *count += 1;
                }
            }
        }

        let voted: Vec<bool> = counts
            .into_iter()
            .map(|count| count * 2 >= hashes.len())
            .collect();

        Ok(Some(Fingerprint::from_bools(&voted)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.bits {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Average-hash over a fixed grid, one bit per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHasher {
    grid_width: u32,
    grid_height: u32,
}

impl Default for FrameHasher {
    fn default() -> Self {
        Self {
            grid_width: DEFAULT_GRID_SIZE,
            grid_height: DEFAULT_GRID_SIZE,
        }
    }
}

impl FrameHasher {
    pub fn new(grid_width: u32, grid_height: u32) -> Result<Self, DedupError> {
        validate_grid(grid_width, grid_height)?;

        Ok(Self {
            grid_width,
            grid_height,
        })
    }

    pub fn hash_frame(&self, frame: &image::RgbImage) -> Result<Fingerprint> {
        let (width, height) = frame.dimensions();

        // img_hash ships its own `image` version, so hand the pixels over raw
        let buffer = img_hash_image::RgbImage::from_raw(width, height, frame.as_raw().clone())
            .context("Failed to create image buffer from frame")?;
        let dynamic_img = img_hash_image::DynamicImage::ImageRgb8(buffer);

        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .hash_size(self.grid_width, self.grid_height)
            .to_hasher();

        let hash = hasher.hash_image(&dynamic_img);

        Ok(Fingerprint::from_bytes(hash.as_bytes()))
    }

    /// Reduce sampled frames to a single fingerprint, or `None` when no frame
    /// could be hashed.
    pub fn fingerprint(&self, frames: &[SampledFrame]) -> Option<Fingerprint> {
        let mut frame_hashes = Vec::with_capacity(frames.len());
        for frame in frames {
            match self.hash_frame(&frame.image) {
                Ok(hash) => frame_hashes.push(hash),
                Err(err) => {
                    log::warn!("Skipping frame {} that failed to hash: {:#}", frame.position, err)
                }
            }
        }

        match Fingerprint::majority(&frame_hashes) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                log::warn!("Frame hashes disagree on length: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_dedup::video::testing::split_frame;
    use image::RgbImage;

    fn sampled(position: u64, image: RgbImage) -> SampledFrame {
        SampledFrame { position, image }
    }

    #[test]
    fn test_hamming_distance() {
        let hash1 = Fingerprint::from_bytes(&[0b11110000, 0b10101010]);
        let hash2 = Fingerprint::from_bytes(&[0b11110000, 0b10101010]);
        assert_eq!(hash1.hamming_distance(&hash2).unwrap(), 0);

        let hash3 = Fingerprint::from_bytes(&[0b11110000, 0b00000000]);
        let hash4 = Fingerprint::from_bytes(&[0b00001111, 0b11111111]);
        assert_eq!(hash3.hamming_distance(&hash4).unwrap(), 16);
        assert_eq!(hash4.hamming_distance(&hash3).unwrap(), 16);
    }

    #[test]
    fn test_hamming_distance_rejects_length_mismatch() {
        let short = Fingerprint::from_u64(0, 8);
        let long = Fingerprint::from_u64(0, 64);
        assert!(matches!(
            short.hamming_distance(&long),
            Err(DedupError::BitLengthMismatch {
                expected: 8,
                found: 64
            })
        ));
    }

    #[test]
    fn test_from_u64_bit_order() {
        let hash = Fingerprint::from_u64(0b1000, 4);
        assert_eq!(hash.bit_len(), 4);
        assert!(hash.bit(3));
        assert!(!hash.bit(0));
        assert!(!hash.bit(4));
        assert_eq!(hash.count_ones(), 1);
    }

    #[test]
    fn test_from_u64_clamps_to_64_bits() {
        let hash = Fingerprint::from_u64(u64::MAX, 100);
        assert_eq!(hash.bit_len(), 64);
        assert_eq!(hash.count_ones(), 64);
        assert!(!hash.bit(64));
    }

    #[test]
    fn test_deserialize_accepts_serialized_fingerprint() {
        let hash = Fingerprint::from_u64(0b1011, 12);
        let json = serde_json::to_string(&hash).unwrap();
        let restored: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, hash);
    }

    #[test]
    fn test_deserialize_rejects_short_payload() {
        let forged = serde_json::from_str::<Fingerprint>(r#"{"bits":[],"bit_len":8}"#);
        assert!(forged.is_err());
    }

    #[test]
    fn test_deserialize_rejects_set_padding_bits() {
        let forged = serde_json::from_str::<Fingerprint>(r#"{"bits":[255],"bit_len":4}"#);
        assert!(forged.is_err());

        let clean: Fingerprint = serde_json::from_str(r#"{"bits":[15],"bit_len":4}"#).unwrap();
        let full = Fingerprint::from_u64(0xF, 4);
        assert_eq!(clean.hamming_distance(&full).unwrap(), 0);
    }

    #[test]
    fn test_hasher_rejects_empty_grid() {
        assert!(matches!(
            FrameHasher::new(0, 0),
            Err(DedupError::InvalidConfig(_))
        ));
        assert!(FrameHasher::new(8, 0).is_err());
        assert_eq!(FrameHasher::new(8, 8).unwrap(), FrameHasher::default());
    }

    #[test]
    fn test_majority_keeps_bits_set_in_most_frames() {
        let hashes = [
            Fingerprint::from_u64(0b1000, 4),
            Fingerprint::from_u64(0b1000, 4),
            Fingerprint::from_u64(0b0000, 4),
        ];
        let voted = Fingerprint::majority(&hashes).unwrap().unwrap();
        assert_eq!(voted, Fingerprint::from_u64(0b1000, 4));
    }

    #[test]
    fn test_majority_differs_from_or() {
        let hashes = [
            Fingerprint::from_u64(0b1000, 4),
            Fingerprint::from_u64(0b0100, 4),
            Fingerprint::from_u64(0b0000, 4),
        ];
        let voted = Fingerprint::majority(&hashes).unwrap().unwrap();
        assert_eq!(voted, Fingerprint::from_u64(0b0000, 4));
        assert_ne!(voted, Fingerprint::from_u64(0b1100, 4));
    }

    #[test]
    fn test_majority_ties_round_up() {
        let hashes = [
            Fingerprint::from_u64(0b01, 2),
            Fingerprint::from_u64(0b10, 2),
        ];
        let voted = Fingerprint::majority(&hashes).unwrap().unwrap();
        assert_eq!(voted, Fingerprint::from_u64(0b11, 2));
    }

    #[test]
    fn test_majority_of_nothing_is_absent() {
        assert_eq!(Fingerprint::majority(&[]).unwrap(), None);
    }

    #[test]
    fn test_hash_frame_has_grid_length() {
        let hasher = FrameHasher::default();
        let hash = hasher.hash_frame(&split_frame(0, 255)).unwrap();
        assert_eq!(hash.bit_len(), 64);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let hasher = FrameHasher::default();
        let frames = vec![
            sampled(1, split_frame(0, 255)),
            sampled(2, split_frame(10, 240)),
            sampled(3, split_frame(0, 255)),
        ];
        let first = hasher.fingerprint(&frames).unwrap();
        let second = hasher.fingerprint(&frames).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hamming_distance(&second).unwrap(), 0);
    }

    #[test]
    fn test_fingerprint_separates_different_content() {
        let hasher = FrameHasher::default();
        let light_left = hasher
            .fingerprint(&[sampled(1, split_frame(255, 0))])
            .unwrap();
        let light_right = hasher
            .fingerprint(&[sampled(1, split_frame(0, 255))])
            .unwrap();
        assert!(light_left.hamming_distance(&light_right).unwrap() >= 32);
    }

    #[test]
    fn test_fingerprint_of_no_frames_is_absent() {
        let hasher = FrameHasher::default();
        assert_eq!(hasher.fingerprint(&[]), None);
    }
}
