//! OpenAI-compatible embedding and chat completion clients

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Embedder, GenerateError, GenerationRequest, Generator};
use crate::{Error, Result};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI accepts at most four stop sequences
const MAX_STOP_SEQUENCES: usize = 4;

/// Response from the embeddings endpoint
#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(serde::Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Response from the chat completions endpoint
#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Apply bearer auth when a key is configured
fn authorize(builder: reqwest::RequestBuilder, api_key: Option<&SecretString>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => builder.header("Authorization", format!("Bearer {}", key.expose_secret())),
        None => builder,
    }
}

/// Embeds text through an OpenAI-compatible `/v1/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiEmbedder {
    /// Create a new embedder
    ///
    /// `api_key` may be omitted for local servers that do not require auth.
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<SecretString>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        tracing::debug!(count = input.len(), model = %self.model, "requesting embeddings");

        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let builder = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&request);

        let response = authorize(builder, self.api_key.as_ref())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "embedding request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "embedding API error");
            return Err(Error::Embedding(format!("embedding API error {status}: {body}")));
        }

        let mut result: EmbeddingResponse = response.json().await?;
        if result.data.len() != input.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                result.data.len()
            )));
        }

        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Generates text through an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    /// Create a new generator
    #[must_use]
    pub fn new(base_url: &str, api_key: Option<SecretString>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: 0.7,
        }
    }

    /// Override the sampling temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerateError> {
        #[derive(serde::Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            max_tokens: u32,
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            stop: Option<&'a [String]>,
        }

        let stop_len = request.stop_sequences.len().min(MAX_STOP_SEQUENCES);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            stop: (stop_len > 0).then(|| &request.stop_sequences[..stop_len]),
        };

        tracing::debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            prompt_len = request.prompt.len(),
            "requesting completion"
        );

        let builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);

        let response = authorize(builder, self.api_key.as_ref())
            .send()
            .await
            .map_err(|e| GenerateError::Engine(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(GenerateError::Engine(format!(
                "chat completion API error {status}: {body}"
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Engine(format!("failed to parse completion: {e}")))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(response_len = text.len(), "completion received");
        Ok(text)
    }
}
