//! Error types for Barista Buddy

use thiserror::Error;

/// Result type alias for Barista Buddy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Barista Buddy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persona could not be loaded
    #[error("persona error: {0}")]
    Persona(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Embedding error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Knowledge base artifact is malformed
    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    /// Lexicon or keyword list is malformed
    #[error("lexicon error: {0}")]
    Lexicon(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
