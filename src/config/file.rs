//! TOML configuration file loading
//!
//! Supports `~/.config/barista-buddy/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Data file overrides
    #[serde(default)]
    pub data: DataFileConfig,

    /// Decision thresholds
    #[serde(default)]
    pub thresholds: ThresholdsFileConfig,

    /// Listening loop settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Generative fallback model
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Embedding model
    #[serde(default)]
    pub embedding: EmbeddingFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Paths replacing the compiled-in data files
#[derive(Debug, Default, Deserialize)]
pub struct DataFileConfig {
    /// Directory searched for data files by their standard names
    pub dir: Option<String>,
    pub knowledge: Option<String>,
    pub lexicon: Option<String>,
    pub keywords: Option<String>,
    pub stop_phrases: Option<String>,
    pub persona: Option<String>,
    pub batch_queries: Option<String>,
}

/// Decision thresholds
#[derive(Debug, Default, Deserialize)]
pub struct ThresholdsFileConfig {
    /// Minimum similarity for an FAQ hit
    pub acceptance: Option<f32>,

    /// Minimum centroid similarity for the topic gate
    pub relevance: Option<f32>,

    /// Token length from which one edit is corrected
    pub one_edit_min_len: Option<usize>,

    /// Token length from which two edits are corrected
    pub two_edit_min_len: Option<usize>,
}

/// Listening loop settings
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub max_consecutive_failures: Option<u32>,
    pub capture_timeout_secs: Option<u64>,
    pub transcribe_timeout_secs: Option<u64>,
    pub greet: Option<bool>,
}

/// Generative fallback configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Disable generation entirely (misses always get the apology)
    pub enabled: Option<bool>,

    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    pub max_tokens: Option<u32>,
    pub max_chars: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f32>,
}

/// Embedding configuration
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingFileConfig {
    /// "local" or "openai"
    pub provider: Option<String>,

    /// Model identifier (e.g. "text-embedding-3-small")
    pub model: Option<String>,

    /// OpenAI-compatible base URL
    pub base_url: Option<String>,

    /// Vector length of the local embedder
    pub dimensions: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// RMS energy above which audio counts as speech
    pub energy_threshold: Option<f32>,

    /// Trailing silence that ends an utterance
    pub silence_ms: Option<u64>,

    /// Longest single capture window
    pub max_capture_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path, with the same fallbacks
pub fn load_config_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/barista-buddy/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("barista-buddy").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: ConfigFile = toml::from_str(
            r#"
            [thresholds]
            acceptance = 0.8

            [llm]
            model = "llama3"
            base_url = "http://localhost:11434"
            "#,
        )
        .unwrap();
        assert_eq!(fc.thresholds.acceptance, Some(0.8));
        assert_eq!(fc.thresholds.relevance, None);
        assert_eq!(fc.llm.model.as_deref(), Some("llama3"));
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[thresholds\nacceptance = ").unwrap();
        let fc = load_config_from(&path);
        assert!(fc.thresholds.acceptance.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let fc = load_config_from(Path::new("/nonexistent/barista/config.toml"));
        assert!(fc.llm.model.is_none());
    }
}
