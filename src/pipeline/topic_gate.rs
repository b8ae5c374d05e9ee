//! Domain gate deciding whether a query is about coffee

use std::sync::Arc;

use crate::knowledge::cosine_similarity;
use crate::providers::Embedder;
use crate::{Error, Result};

use super::normalizer::tokenize;

/// Inflections a single-word keyword may carry ("bean" matches "beans",
/// "brew" matches "brewing"); anything longer must be listed on its own
const INFLECTIONS: &[&str] = &["s", "es", "ed", "ing"];

/// Domain keywords, matched on token boundaries
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: Vec<Vec<String>>,
}

impl KeywordSet {
    /// Build a keyword set; each keyword may span several words
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords: Vec<Vec<String>> = keywords
            .into_iter()
            .map(|k| tokenize(k.as_ref()))
            .filter(|tokens| !tokens.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords }
    }

    /// Parse a keyword list: one keyword per line, `#` starts a comment
    ///
    /// # Errors
    ///
    /// Returns error if the list contains no keywords
    pub fn parse(content: &str) -> Result<Self> {
        let set = Self::new(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or_default().trim())
                .filter(|line| !line.is_empty()),
        );
        if set.is_empty() {
            return Err(Error::Config("keyword list is empty".to_string()));
        }
        Ok(set)
    }

    /// Number of keywords
    #[must_use]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Whether there are no keywords
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// First keyword found in `tokens`, joined by spaces
    #[must_use]
    pub fn find(&self, tokens: &[String]) -> Option<String> {
        self.keywords
            .iter()
            .find(|keyword| contains_sequence(tokens, keyword))
            .map(|keyword| keyword.join(" "))
    }
}

fn contains_sequence(tokens: &[String], keyword: &[String]) -> bool {
    match keyword {
        [single] => tokens.iter().any(|t| token_matches(t, single)),
        _ => tokens.windows(keyword.len()).any(|w| w == keyword),
    }
}

fn token_matches(token: &str, keyword: &str) -> bool {
    token
        .strip_prefix(keyword)
        .is_some_and(|rest| rest.is_empty() || INFLECTIONS.contains(&rest))
}

/// Outcome of the domain check
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// A domain keyword was found; no embedding was computed
    Keyword {
        /// Matched keyword
        keyword: String,
    },

    /// The embedding was close enough to the domain centroid
    Embedding {
        /// Cosine similarity to the centroid
        score: f32,
        /// Query embedding, reusable for retrieval
        embedding: Vec<f32>,
    },

    /// Neither signal fired
    Rejected {
        /// Centroid similarity, `None` when embedding failed
        score: Option<f32>,
    },
}

impl GateDecision {
    /// Whether the query is in-domain
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Take the query embedding computed by the gate, if any
    #[must_use]
    pub fn into_embedding(self) -> Option<Vec<f32>> {
        match self {
            Self::Embedding { embedding, .. } => Some(embedding),
            _ => None,
        }
    }

    /// Short label for logs
    #[must_use]
    pub const fn signal(&self) -> &'static str {
        match self {
            Self::Keyword { .. } => "keyword",
            Self::Embedding { .. } => "embedding",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Decides whether text belongs to the coffee domain
pub struct TopicGate {
    keywords: KeywordSet,
    embedder: Arc<dyn Embedder>,
    centroid: Vec<f32>,
    threshold: f32,
}

impl TopicGate {
    /// Create a gate over a keyword set and a domain centroid
    #[must_use]
    pub fn new(
        keywords: KeywordSet,
        embedder: Arc<dyn Embedder>,
        centroid: Vec<f32>,
        threshold: f32,
    ) -> Self {
        Self {
            keywords,
            embedder,
            centroid,
            threshold,
        }
    }

    /// Relevance threshold for the embedding signal
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Check already tokenized text
    ///
    /// The keyword check runs first and skips embedding entirely. An embedding
    /// failure counts as a failed embedding signal.
    pub async fn evaluate(&self, text: &str, tokens: &[String]) -> GateDecision {
        if let Some(keyword) = self.keywords.find(tokens) {
            tracing::debug!(keyword = %keyword, "topic gate: keyword match");
            return GateDecision::Keyword { keyword };
        }

        match self.embedder.embed(text).await {
            Ok(embedding) => {
                let score = cosine_similarity(&self.centroid, &embedding);
                tracing::debug!(score, threshold = self.threshold, "topic gate: centroid similarity");
                if score >= self.threshold {
                    GateDecision::Embedding { score, embedding }
                } else {
                    GateDecision::Rejected { score: Some(score) }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "topic gate embedding failed");
                GateDecision::Rejected { score: None }
            }
        }
    }

    /// Check free text, such as a generated answer
    pub async fn check_text(&self, text: &str) -> GateDecision {
        let tokens = tokenize(text);
        self.evaluate(&text.to_lowercase(), &tokens).await
    }

    /// Whether free text is in-domain
    pub async fn is_in_domain(&self, text: &str) -> bool {
        self.check_text(text).await.is_accepted()
    }
}
