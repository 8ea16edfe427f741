//! Content fingerprints for duplicate detection.
//!
//! An exact digest catches byte-identical text after normalization; word
//! shingles catch near duplicates (same page behind two URLs with a
//! different timestamp or tracking snippet).

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::quality::words;

/// Words per shingle.
const SHINGLE_WORDS: usize = 5;

#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// Hex SHA-256 of the normalized text.
    pub digest: String,
    shingles: HashSet<u64>,
}

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        let words = words(text);
        let normalized = words.join(" ");

        let shingles = if words.is_empty() {
            HashSet::new()
        } else if words.len() < SHINGLE_WORDS {
            HashSet::from([hash64(&normalized)])
        } else {
            words
                .windows(SHINGLE_WORDS)
                .map(|w| hash64(&w.join(" ")))
                .collect()
        };

        Self {
            digest: format!("{:x}", Sha256::digest(normalized.as_bytes())),
            shingles,
        }
    }

    /// Jaccard similarity of the shingle sets.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.shingles.is_empty() && other.shingles.is_empty() {
            return 1.0;
        }
        let shared = self.shingles.intersection(&other.shingles).count();
        let union = self.shingles.len() + other.shingles.len() - shared;
        shared as f64 / union as f64
    }

    /// Exact match, or shingle similarity at or above `threshold`.
    pub fn matches(&self, other: &Fingerprint, threshold: f64) -> bool {
        self.digest == other.digest || self.similarity(other) >= threshold
    }
}

fn hash64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}
