//! Speech-to-text (STT) clients

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{AudioClip, TranscribeError, Transcriber};
use crate::pipeline::Utterance;
use crate::{Error, Result};

const WHISPER_BASE_URL: &str = "https://api.openai.com";
const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
    base_url: String,
    language: Option<String>,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = require_key(api_key, "OpenAI API key required for Whisper")?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
            base_url: WHISPER_BASE_URL.to_string(),
            language: None,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: Option<SecretString>, model: String) -> Result<Self> {
        let api_key = require_key(api_key, "Deepgram API key required")?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
            base_url: DEEPGRAM_BASE_URL.to_string(),
            language: None,
        })
    }

    /// Point the client at a different host (proxies, test servers)
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Hint the spoken language (ISO-639-1, e.g. "en")
    #[must_use]
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(str::to_string);
        self
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe_wav(&self, audio: &[u8]) -> Result<(String, Option<f32>)> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await.map(|t| (t, None)),
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<(String, Option<f32>)> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let mut url = format!(
            "{}/v1/listen?model={}&punctuate=true",
            self.base_url, self.model
        );
        if let Some(language) = &self.language {
            url.push_str("&language=");
            url.push_str(language);
        }

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?;

        let (transcript, confidence) = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| (a.transcript, a.confidence))
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok((transcript, confidence))
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &AudioClip) -> std::result::Result<Utterance, TranscribeError> {
        let wav = audio
            .to_wav()
            .map_err(|e| TranscribeError::Engine(e.to_string()))?;

        let (text, confidence) = self
            .transcribe_wav(&wav)
            .await
            .map_err(|e| TranscribeError::Engine(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(TranscribeError::NoSpeech);
        }

        let utterance = Utterance::new(text);
        Ok(match confidence {
            Some(c) => utterance.with_confidence(c),
            None => utterance,
        })
    }
}

fn require_key(api_key: Option<SecretString>, message: &str) -> Result<SecretString> {
    api_key
        .filter(|k| !k.expose_secret().is_empty())
        .ok_or_else(|| Error::Config(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_config_error() {
        assert!(matches!(
            SpeechToText::new_whisper(None, "whisper-1".to_string()),
            Err(Error::Config(_))
        ));
        assert!(SpeechToText::new_deepgram(Some(SecretString::from(String::new())), "nova-2".to_string()).is_err());
    }

    #[test]
    fn provider_names() {
        assert_eq!("Whisper".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!("deepgram".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert!("vosk".parse::<SttProvider>().is_err());
    }
}
