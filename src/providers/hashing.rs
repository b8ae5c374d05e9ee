//! Offline feature-hashing embedder
//!
//! Maps each content word to a signed bucket of a fixed-size vector using a
//! stable hash, then L2-normalizes. Shares no weights with any model, so it
//! only captures lexical overlap, but it is deterministic across runs and
//! needs no network.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::Result;

/// Default vector length
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Words carrying no topical signal
const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "between", "by", "can", "difference", "do",
    "does", "for", "from", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "should",
    "so", "that", "the", "this", "to", "versus", "vs", "what", "when", "which", "who", "why",
    "with", "you", "your",
];

/// Deterministic bag-of-words embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimensions` length
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-{dimensions}"),
        }
    }

    /// Vector length
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed synchronously
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        let lower = text.to_lowercase();

        for token in lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .map(|t| t.trim_matches('\''))
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = u64::from_le_bytes(bucket_bytes);

            #[allow(clippy::cast_possible_truncation)]
            let index = (bucket % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::default();
        assert_eq!(
            embedder.embed_sync("how do I make an espresso?"),
            embedder.embed_sync("how do I make an espresso?")
        );
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_sync("Espresso, please!");
        let b = embedder.embed_sync("espresso please");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_stopwords_only_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed_sync("how do I");
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_comparison_words_carry_no_signal() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_sync("arabica vs robusta");
        let b = embedder.embed_sync("What is the difference between arabica and robusta?");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_unit_length() {
        let embedder = HashingEmbedder::default();
        let v = embedder.embed_sync("cold brew coffee ratio");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_model_id_includes_dimensions() {
        assert_eq!(HashingEmbedder::new(64).model_id(), "hashing-64");
    }
}
