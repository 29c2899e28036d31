//! Deterministic hash-based embedder.
//!
//! Word-level hashing spread across a fixed number of dimensions. Texts that
//! share most of their words land close together, which is enough for the
//! semantic gate to catch light rewordings without a model.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

use super::{DEFAULT_DIMENSIONS, Embedder};
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Bounds the work done on very long texts.
    const MAX_WORDS: usize = 1000;

    /// Creates an embedder; zero dimensions fall back to the default.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self {
            dimensions: if dimensions == 0 {
                DEFAULT_DIMENSIONS
            } else {
                dimensions
            },
        }
    }

    fn distribute_hash(embedding: &mut [f32], hash: u64, dimensions: usize) {
        for j in 0..8 {
            let idx = (hash >> (j * 8)) as usize % dimensions;
            let value = ((hash >> (j * 4)) & 0xFF) as f32 / 255.0 - 0.5;
            embedding[idx] += value;
        }
    }

    fn normalize(embedding: &mut [f32]) {
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace().take(Self::MAX_WORDS) {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            Self::distribute_hash(&mut embedding, hasher.finish(), self.dimensions);
        }
        Self::normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::default();
        assert_eq!(
            embedder.embed("BTC ETF approved").unwrap(),
            embedder.embed("BTC ETF approved").unwrap()
        );
    }

    #[test]
    fn test_unit_length() {
        let embedding = HashEmbedder::default().embed("ETH unlock next week").unwrap();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_word_overlap_is_closer() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("Vanguard opens crypto ETF trading to clients").unwrap();
        let b = embedder.embed("Vanguard opens crypto ETF trading for clients").unwrap();
        let c = embedder.embed("Kraken suffers exchange hack").unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn test_empty_text_rejected() {
        assert!(HashEmbedder::default().embed("  ").is_err());
    }
}
