//! Constrained generation for queries the knowledge base cannot answer

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::providers::{GenerateError, GenerationRequest, Generator};

use super::normalizer::NormalizedQuery;
use super::topic_gate::TopicGate;

/// Bounds applied to every generation call
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Upper bound on generated tokens
    pub max_tokens: u32,

    /// Longest accepted answer, in characters
    pub max_chars: usize,

    /// Time allowed for one generation
    pub timeout: Duration,

    /// Sequences that end the answer
    pub stop_sequences: Vec<String>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 120,
            max_chars: 600,
            timeout: Duration::from_secs(20),
            stop_sequences: vec!["\nUser:".to_string()],
        }
    }
}

/// Why a generated answer was not used
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AnswerRejection {
    /// The generator did not finish in time
    Timeout,
    /// The generator failed
    Engine { message: String },
    /// Nothing left after cleanup
    Empty,
    /// Longer than the configured maximum
    TooLong { chars: usize, max: usize },
    /// The answer itself is not about coffee
    OffTopic,
}

impl fmt::Display for AnswerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "generation timed out"),
            Self::Engine { message } => write!(f, "generation failed: {message}"),
            Self::Empty => write!(f, "empty answer"),
            Self::TooLong { chars, max } => write!(f, "answer too long ({chars} > {max} chars)"),
            Self::OffTopic => write!(f, "answer is off-topic"),
        }
    }
}

/// Result of one fallback attempt
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    /// Cleaned generated text (possibly empty)
    pub text: String,

    /// Whether the answer passed validation
    pub valid: bool,

    /// Prompt sent to the generator
    pub prompt: String,

    /// Set when `valid` is false
    pub rejection: Option<AnswerRejection>,
}

impl GeneratedAnswer {
    fn rejected(text: String, prompt: String, rejection: AnswerRejection) -> Self {
        tracing::info!(reason = %rejection, "generated answer rejected");
        Self {
            text,
            valid: false,
            prompt,
            rejection: Some(rejection),
        }
    }
}

/// Builds the constrained prompt, runs generation and validates the output
pub struct FallbackArbiter {
    generator: Arc<dyn Generator>,
    gate: Arc<TopicGate>,
    preamble: String,
    assistant_label: String,
    policy: FallbackPolicy,
}

impl FallbackArbiter {
    /// Create an arbiter
    ///
    /// `assistant_label` is the name the prompt uses to cue the answer
    /// ("Barista Buddy").
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        gate: Arc<TopicGate>,
        preamble: impl Into<String>,
        assistant_label: impl Into<String>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            generator,
            gate,
            preamble: preamble.into(),
            assistant_label: assistant_label.into(),
            policy,
        }
    }

    /// Bounds in use
    #[must_use]
    pub const fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Prompt for a query: preamble, the user turn, then the assistant cue
    #[must_use]
    pub fn build_prompt(&self, query: &NormalizedQuery) -> String {
        format!(
            "{}\n\nUser: {}\n{}:",
            self.preamble.trim_end(),
            query.text,
            self.assistant_label
        )
    }

    /// Generate and validate an answer for a query the retriever missed
    pub async fn resolve_fallback(&self, query: &NormalizedQuery) -> GeneratedAnswer {
        let prompt = self.build_prompt(query);
        let request = GenerationRequest {
            prompt: prompt.clone(),
            max_tokens: self.policy.max_tokens,
            stop_sequences: self.policy.stop_sequences.clone(),
        };

        tracing::debug!(model = %self.generator.model_id(), "running fallback generation");

        let raw = match tokio::time::timeout(self.policy.timeout, self.generator.generate(&request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(GenerateError::Timeout(_))) | Err(_) => {
                return GeneratedAnswer::rejected(String::new(), prompt, AnswerRejection::Timeout);
            }
            Ok(Err(GenerateError::Engine(message))) => {
                tracing::warn!(error = %message, "generator failed");
                return GeneratedAnswer::rejected(
                    String::new(),
                    prompt,
                    AnswerRejection::Engine { message },
                );
            }
        };

        let text = self.clean(&raw);

        if text.is_empty() {
            return GeneratedAnswer::rejected(text, prompt, AnswerRejection::Empty);
        }

        let chars = text.chars().count();
        if chars > self.policy.max_chars {
            return GeneratedAnswer::rejected(
                text,
                prompt,
                AnswerRejection::TooLong {
                    chars,
                    max: self.policy.max_chars,
                },
            );
        }

        if !self.gate.is_in_domain(&text).await {
            return GeneratedAnswer::rejected(text, prompt, AnswerRejection::OffTopic);
        }

        tracing::debug!(chars, "generated answer accepted");
        GeneratedAnswer {
            text,
            valid: true,
            prompt,
            rejection: None,
        }
    }

    /// Trim, drop an echoed prompt or leading persona label, cut at the first
    /// stop sequence
    fn clean(&self, raw: &str) -> String {
        let label = format!("{}:", self.assistant_label);

        // Completion-style engines echo the prompt; keep what follows the last cue
        let mut text = raw.rsplit_once(&label).map_or(raw, |(_, after)| after);

        for stop in &self.policy.stop_sequences {
            if let Some(pos) = text.find(stop.as_str()) {
                text = &text[..pos];
            }
        }

        text.trim().to_string()
    }
}
