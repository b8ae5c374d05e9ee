//! Model providers for embeddings and text generation
//!
//! The query pipeline only ever talks to the [`Embedder`] and [`Generator`]
//! traits. Concrete bindings:
//! - **openai**: OpenAI-compatible `/v1/embeddings` and `/v1/chat/completions`
//!   (also works against Ollama and other compatible servers)
//! - **hashing**: deterministic offline embedder for text mode and tests

mod hashing;
mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use hashing::HashingEmbedder;
pub use openai::{DEFAULT_BASE_URL, OpenAiEmbedder, OpenAiGenerator};

use crate::Result;

/// Produces fixed-length vectors for text
///
/// Implementations must be deterministic: identical text with the same model
/// yields an identical vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model (used to validate cached vectors)
    fn model_id(&self) -> &str;

    /// Embed a single text
    ///
    /// # Errors
    ///
    /// Returns error if the embedding backend fails
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order
    ///
    /// # Errors
    ///
    /// Returns error if any embedding fails
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Parameters for a single bounded generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Full prompt, preamble included
    pub prompt: String,

    /// Upper bound on generated tokens
    pub max_tokens: u32,

    /// Sequences that end generation
    pub stop_sequences: Vec<String>,
}

/// Failure modes of the `generate` capability
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Generation did not finish in time
    #[error("generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Backend failed or returned an unusable payload
    #[error("generation engine error: {0}")]
    Engine(String),
}

/// Generates text from a prompt
#[async_trait]
pub trait Generator: Send + Sync {
    /// Identifier of the generative model
    fn model_id(&self) -> &str;

    /// Run one generation
    ///
    /// # Errors
    ///
    /// Returns `GenerateError::Engine` on backend failure
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerateError>;
}

/// Generator used when no generative backend is configured
///
/// Every call fails, so the fallback path always yields the apology.
#[derive(Debug, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_id(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> std::result::Result<String, GenerateError> {
        Err(GenerateError::Engine("no generator configured".to_string()))
    }
}
