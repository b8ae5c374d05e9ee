//! Query resolution pipeline
//!
//! Turns one transcribed utterance into exactly one tagged [`Response`]:
//!
//! ```text
//! utterance ─► Normalizer ─► TopicGate ──reject──► refusal
//!                               │
//!                               ▼
//!                           Retriever ──hit──► FAQ answer
//!                               │
//!                             miss
//!                               ▼
//!                        FallbackArbiter ──invalid──► apology
//!                               │
//!                               ▼
//!                        generated answer
//! ```

mod fallback;
mod normalizer;
mod topic_gate;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use fallback::{AnswerRejection, FallbackArbiter, FallbackPolicy, GeneratedAnswer};
pub use normalizer::{
    CorrectionPolicy, Lexicon, NormalizedQuery, Normalizer, Substitution, Utterance, levenshtein,
    tokenize,
};
pub use topic_gate::{GateDecision, KeywordSet, TopicGate};

use crate::knowledge::Retriever;

/// Which path produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// Stored knowledge-base answer
    Faq,
    /// Validated generated answer
    Generated,
    /// Refusal or apology
    Refused,
}

impl ResponseSource {
    /// Lowercase tag
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Faq => "faq",
            Self::Generated => "generated",
            Self::Refused => "refused",
        }
    }
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final answer text with its single source tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub text: String,
    pub source: ResponseSource,
}

impl Response {
    fn new(text: impl Into<String>, source: ResponseSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }
}

/// How the pipeline arrived at a response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Gate rejected the query
    TopicRejected { score: Option<f32> },

    /// Retrieval hit
    FaqHit { index: usize, score: f32 },

    /// Retrieval missed and generation produced a valid answer
    Generated { best_score: Option<f32> },

    /// Retrieval missed and generation was unusable
    GenerationRejected {
        best_score: Option<f32>,
        reason: AnswerRejection,
    },
}

/// Everything the pipeline decided for one query
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub query: NormalizedQuery,
    pub response: Response,
    pub outcome: Outcome,
}

/// Fixed reply texts the pipeline may return
#[derive(Debug, Clone)]
pub struct Replies {
    /// Returned when the gate rejects a query
    pub refusal: String,
    /// Returned when fallback generation is unusable
    pub apology: String,
}

/// Running counters over resolved queries
#[derive(Debug, Default)]
pub struct PipelineStats {
    queries: AtomicU64,
    rejected: AtomicU64,
    retrievals: AtomicU64,
    faq_hits: AtomicU64,
    fallbacks: AtomicU64,
    generated: AtomicU64,
    generation_refused: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub rejected: u64,
    pub retrievals: u64,
    pub faq_hits: u64,
    pub fallbacks: u64,
    pub generated: u64,
    pub generation_refused: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            faq_hits: self.faq_hits.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            generation_refused: self.generation_refused.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queries={} rejected={} retrievals={} faq_hits={} fallbacks={} generated={} generation_refused={}",
            self.queries,
            self.rejected,
            self.retrievals,
            self.faq_hits,
            self.fallbacks,
            self.generated,
            self.generation_refused
        )
    }
}

/// Normalizer, gate, retriever and fallback wired in order
pub struct QueryPipeline {
    normalizer: Arc<Normalizer>,
    gate: Arc<TopicGate>,
    retriever: Retriever,
    arbiter: FallbackArbiter,
    replies: Replies,
    stats: PipelineStats,
}

impl QueryPipeline {
    /// Wire the stages together
    #[must_use]
    pub fn new(
        normalizer: Arc<Normalizer>,
        gate: Arc<TopicGate>,
        retriever: Retriever,
        arbiter: FallbackArbiter,
        replies: Replies,
    ) -> Self {
        Self {
            normalizer,
            gate,
            retriever,
            arbiter,
            replies,
            stats: PipelineStats::default(),
        }
    }

    /// Normalizer used for incoming text
    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Counters since construction
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve raw utterance text
    pub async fn resolve(&self, text: &str) -> Resolution {
        let query = self.normalizer.normalize(text);
        self.resolve_normalized(query).await
    }

    /// Resolve an already normalized query
    ///
    /// Never fails: every capability error degrades to a refusal or apology.
    pub async fn resolve_normalized(&self, query: NormalizedQuery) -> Resolution {
        PipelineStats::bump(&self.stats.queries);

        let decision = self.gate.evaluate(&query.text, &query.tokens).await;
        if let GateDecision::Rejected { score } = decision {
            PipelineStats::bump(&self.stats.rejected);
            tracing::info!(query = %query.text, score = ?score, "query rejected as off-topic");
            return Resolution {
                query,
                response: Response::new(&self.replies.refusal, ResponseSource::Refused),
                outcome: Outcome::TopicRejected { score },
            };
        }

        PipelineStats::bump(&self.stats.retrievals);
        let retrieval = match decision.into_embedding() {
            Some(embedding) => Ok(self.retriever.retrieve_embedded(&embedding)),
            None => self.retriever.retrieve(&query).await,
        };

        let best_score = match retrieval {
            Ok(result) => {
                if let Some(entry) = result.hit_entry() {
                    PipelineStats::bump(&self.stats.faq_hits);
                    tracing::info!(index = entry.index, score = result.score, "faq hit");
                    return Resolution {
                        response: Response::new(&entry.answer, ResponseSource::Faq),
                        outcome: Outcome::FaqHit {
                            index: entry.index,
                            score: result.score,
                        },
                        query,
                    };
                }
                result.entry.map(|_| result.score)
            }
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, treating as miss");
                None
            }
        };

        PipelineStats::bump(&self.stats.fallbacks);
        tracing::info!(best_score = ?best_score, "retrieval miss, falling back to generation");

        let answer = self.arbiter.resolve_fallback(&query).await;
        match answer.rejection {
            None => {
                PipelineStats::bump(&self.stats.generated);
                Resolution {
                    query,
                    response: Response::new(answer.text, ResponseSource::Generated),
                    outcome: Outcome::Generated { best_score },
                }
            }
            Some(reason) => {
                PipelineStats::bump(&self.stats.generation_refused);
                Resolution {
                    query,
                    response: Response::new(&self.replies.apology, ResponseSource::Refused),
                    outcome: Outcome::GenerationRejected { best_score, reason },
                }
            }
        }
    }
}
