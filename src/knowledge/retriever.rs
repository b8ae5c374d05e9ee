//! Semantic FAQ retrieval

use std::sync::Arc;

use crate::Result;
use crate::pipeline::NormalizedQuery;
use crate::providers::Embedder;

use super::{KnowledgeBase, KnowledgeEntry};

/// Outcome of a knowledge base lookup
#[derive(Debug, Clone, Copy)]
pub struct RetrievalResult<'a> {
    /// Best-scoring entry, `None` only when there was nothing to compare
    pub entry: Option<&'a KnowledgeEntry>,

    /// Similarity of the best entry (negative infinity without an entry)
    pub score: f32,

    /// Whether `score` met the acceptance threshold
    pub hit: bool,
}

impl<'a> RetrievalResult<'a> {
    /// The matched entry, only when the lookup was a hit
    #[must_use]
    pub fn hit_entry(&self) -> Option<&'a KnowledgeEntry> {
        if self.hit { self.entry } else { None }
    }
}

/// Finds the best-matching knowledge entry for a query
pub struct Retriever {
    knowledge: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
}

impl Retriever {
    /// Create a retriever with a fixed acceptance threshold
    #[must_use]
    pub fn new(knowledge: Arc<KnowledgeBase>, embedder: Arc<dyn Embedder>, threshold: f32) -> Self {
        Self {
            knowledge,
            embedder,
            threshold,
        }
    }

    /// Acceptance threshold in use
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Knowledge base being searched
    #[must_use]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Embed the query and search the knowledge base
    ///
    /// # Errors
    ///
    /// Returns error if the query cannot be embedded
    pub async fn retrieve(&self, query: &NormalizedQuery) -> Result<RetrievalResult<'_>> {
        let embedding = self.embedder.embed(&query.text).await?;
        Ok(self.retrieve_embedded(&embedding))
    }

    /// Search with an already computed query embedding
    ///
    /// Brute-force scan; on equal scores the earliest entry wins.
    #[must_use]
    pub fn retrieve_embedded(&self, embedding: &[f32]) -> RetrievalResult<'_> {
        let mut best: Option<(&KnowledgeEntry, f32)> = None;

        for entry in self.knowledge.entries() {
            let score = cosine_similarity(&entry.embedding, embedding);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((entry, score)),
            }
        }

        let result = match best {
            Some((entry, score)) => RetrievalResult {
                entry: Some(entry),
                score,
                hit: score >= self.threshold,
            },
            None => RetrievalResult {
                entry: None,
                score: f32::NEG_INFINITY,
                hit: false,
            },
        };

        tracing::debug!(
            score = result.score,
            hit = result.hit,
            index = result.entry.map(|e| e.index),
            threshold = self.threshold,
            "retrieval complete"
        );

        result
    }
}

/// Compute cosine similarity between two vectors
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Element-wise mean of equal-length vectors
///
/// Returns an empty vector when there are no inputs
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_vector<'a>(vectors: impl IntoIterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0_usize;

    for vector in vectors {
        if sum.is_empty() {
            sum = vec![0.0; vector.len()];
        }
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += v;
        }
        count += 1;
    }

    if count > 0 {
        for acc in &mut sum {
            *acc /= count as f32;
        }
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeEntry;
    use crate::providers::HashingEmbedder;

    fn entry(question: &str, embedding: Vec<f32>) -> KnowledgeEntry {
        KnowledgeEntry {
            index: 0,
            question: question.to_string(),
            normalized_question: question.to_lowercase(),
            answer: format!("Answer to {question}"),
            tags: vec![],
            embedding,
        }
    }

    fn retriever(entries: Vec<KnowledgeEntry>, threshold: f32) -> Retriever {
        let kb = KnowledgeBase::from_entries(entries, "test").unwrap();
        Retriever::new(Arc::new(kb), Arc::new(HashingEmbedder::new(3)), threshold)
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_mean_vector() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [2.0, 2.0];
        let mean = mean_vector([a.as_slice(), b.as_slice(), c.as_slice()]);
        assert_eq!(mean, vec![1.0, 1.0]);
        assert!(mean_vector(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_best_match_hit() {
        let r = retriever(
            vec![
                entry("espresso", vec![1.0, 0.0, 0.0]),
                entry("latte", vec![0.0, 1.0, 0.0]),
            ],
            0.8,
        );

        let result = r.retrieve_embedded(&[0.1, 0.9, 0.0]);
        assert!(result.hit);
        assert_eq!(result.entry.unwrap().question, "latte");
        assert!(result.score > 0.9);
    }

    #[test]
    fn test_below_threshold_is_miss_with_score() {
        let r = retriever(
            vec![
                entry("espresso", vec![1.0, 0.0, 0.0]),
                entry("latte", vec![0.0, 1.0, 0.0]),
            ],
            0.8,
        );

        let result = r.retrieve_embedded(&[1.0, 1.0, 1.0]);
        assert!(!result.hit);
        assert!(result.hit_entry().is_none());
        // Best score still recorded for diagnostics
        assert!(result.entry.is_some());
        assert!(result.score > 0.5 && result.score < 0.8);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let r = retriever(vec![entry("espresso", vec![1.0, 0.0, 0.0])], 1.0);
        let result = r.retrieve_embedded(&[2.0, 0.0, 0.0]);
        assert!(result.hit);
    }

    #[test]
    fn test_ties_resolve_to_earliest_entry() {
        let r = retriever(
            vec![
                entry("first", vec![1.0, 0.0, 0.0]),
                entry("second", vec![1.0, 0.0, 0.0]),
                entry("third", vec![1.0, 0.0, 0.0]),
            ],
            0.5,
        );

        for _ in 0..3 {
            let result = r.retrieve_embedded(&[1.0, 0.0, 0.0]);
            assert_eq!(result.entry.unwrap().question, "first");
            assert_eq!(result.entry.unwrap().index, 0);
        }
    }

    #[test]
    fn test_zero_query_vector_is_miss() {
        let r = retriever(vec![entry("espresso", vec![1.0, 0.0, 0.0])], 0.5);
        let result = r.retrieve_embedded(&[0.0, 0.0, 0.0]);
        assert!(!result.hit);
        assert_eq!(result.score, 0.0);
    }
}
