use super::{Fingerprint, VideoReference};
use crate::error::{DedupError, Result};

/// Result of checking one fingerprint against the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// No stored entry was close enough; the fingerprint was registered.
    Registered,
    /// The first stored entry within threshold. Nothing was registered.
    Duplicate {
        original: VideoReference,
        distance: u32,
    },
}

/// Insertion-ordered map of video reference to fingerprint.
///
/// Every stored fingerprint has the same bit length, fixed by the first
/// registration.
#[derive(Debug, Clone, Default)]
pub struct FingerprintIndex {
    entries: Vec<(VideoReference, Fingerprint)>,
    bit_len: Option<usize>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bit_len(&self) -> Option<usize> {
        self.bit_len
    }

    pub fn get(&self, reference: &VideoReference) -> Option<&Fingerprint> {
        self.entries
            .iter()
            .find(|(stored, _)| stored == reference)
            .map(|(_, fingerprint)| fingerprint)
    }

    pub fn contains(&self, reference: &VideoReference) -> bool {
        self.get(reference).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VideoReference, &Fingerprint)> {
        self.entries.iter().map(|(reference, fingerprint)| (reference, fingerprint))
    }

    /// First stored entry, in insertion order, within `threshold` of
    /// `fingerprint`. Later entries are not examined once one matches.
    pub fn find_first_within(
        &self,
        fingerprint: &Fingerprint,
        threshold: u32,
    ) -> Result<Option<(&VideoReference, u32)>> {
        self.check_bit_len(fingerprint)?;

        for (reference, stored) in &self.entries {
            let distance = fingerprint.hamming_distance(stored)?;
            if distance <= threshold {
                return Ok(Some((reference, distance)));
            }
        }

        Ok(None)
    }

    /// Report the first near duplicate, or register `fingerprint` under
    /// `reference` when none is within `threshold`.
    pub fn check_and_register(
        &mut self,
        reference: VideoReference,
        fingerprint: Fingerprint,
        threshold: u32,
    ) -> Result<Match> {
        if let Some((original, distance)) = self.find_first_within(&fingerprint, threshold)? {
            return Ok(Match::Duplicate {
                original: original.clone(),
                distance,
            });
        }

        self.insert(reference, fingerprint)?;
        Ok(Match::Registered)
    }

    /// Store `fingerprint` without a duplicate check. A reference that is
    /// already present keeps its position and takes the new fingerprint.
    pub fn insert(&mut self, reference: VideoReference, fingerprint: Fingerprint) -> Result<()> {
        self.check_bit_len(&fingerprint)?;
        self.bit_len = Some(fingerprint.bit_len());

        match self.entries.iter_mut().find(|(stored, _)| *stored == reference) {
            Some((_, stored)) => *stored = fingerprint,
            None => self.entries.push((reference, fingerprint)),
        }

        Ok(())
    }

    /// Evict one reference. Returns its fingerprint if it was present.
    pub fn remove(&mut self, reference: &VideoReference) -> Option<Fingerprint> {
        let position = self
            .entries
            .iter()
            .position(|(stored, _)| stored == reference)?;
        let (_, fingerprint) = self.entries.remove(position);
        if self.entries.is_empty() {
            self.bit_len = None;
        }
        Some(fingerprint)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bit_len = None;
    }

    fn check_bit_len(&self, fingerprint: &Fingerprint) -> Result<()> {
        match self.bit_len {
            Some(expected) if expected != fingerprint.bit_len() => {
                Err(DedupError::BitLengthMismatch {
                    expected,
                    found: fingerprint.bit_len(),
                })
            }
            _ => Ok(()),
        }
    }
}
