//! Configuration management for Barista Buddy
//!
//! Precedence is env > `config.toml` > defaults. Every field has a default,
//! so an absent file and an empty environment yield a working text-mode
//! configuration with the offline embedder.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::persona::Persona;
use crate::pipeline::{CorrectionPolicy, FallbackPolicy};
use crate::providers::DEFAULT_BASE_URL;
use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

use file::ConfigFile;

/// Barista Buddy configuration
#[derive(Debug, Default)]
pub struct Config {
    /// Data file locations
    pub data: DataPaths,

    /// Decision thresholds
    pub thresholds: Thresholds,

    /// Listening loop settings
    pub session: SessionSettings,

    /// Generative fallback model
    pub llm: LlmConfig,

    /// Embedding model
    pub embedding: EmbeddingConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Standard data file names, looked up inside the data directory
pub const KNOWLEDGE_FILE: &str = "coffee_knowledge.json";
pub const LEXICON_FILE: &str = "pronunciation_dict.json";
pub const KEYWORDS_FILE: &str = "coffee_keywords.txt";
pub const STOP_PHRASES_FILE: &str = "stop_phrases.txt";
pub const PERSONA_FILE: &str = "persona.json";
pub const BATCH_QUERIES_FILE: &str = "batch_queries.json";

/// Locations of the data files; `None` means the compiled-in default
#[derive(Debug, Clone, Default)]
pub struct DataPaths {
    pub knowledge: Option<PathBuf>,
    pub lexicon: Option<PathBuf>,
    pub keywords: Option<PathBuf>,
    pub stop_phrases: Option<PathBuf>,
    pub persona: Option<PathBuf>,
    pub batch_queries: Option<PathBuf>,
}

impl DataPaths {
    /// Resolve each file: explicit path, else `<dir>/<standard name>` if it exists
    fn resolve(dir: Option<&Path>, fc: file::DataFileConfig) -> Self {
        let pick = |explicit: Option<String>, name: &str| -> Option<PathBuf> {
            explicit.map(PathBuf::from).or_else(|| {
                dir.map(|d| d.join(name)).filter(|p| p.is_file())
            })
        };

        Self {
            knowledge: pick(fc.knowledge, KNOWLEDGE_FILE),
            lexicon: pick(fc.lexicon, LEXICON_FILE),
            keywords: pick(fc.keywords, KEYWORDS_FILE),
            stop_phrases: pick(fc.stop_phrases, STOP_PHRASES_FILE),
            persona: pick(fc.persona, PERSONA_FILE),
            batch_queries: pick(fc.batch_queries, BATCH_QUERIES_FILE),
        }
    }
}

/// Decision thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum cosine similarity for an FAQ hit
    pub acceptance: f32,

    /// Minimum centroid similarity for the embedding gate signal
    pub relevance: f32,

    /// Edit budget for vocabulary correction
    pub correction: CorrectionPolicy,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            acceptance: 0.75,
            relevance: 0.35,
            correction: CorrectionPolicy::default(),
        }
    }
}

/// Listening loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Consecutive capture/transcription failures that end the session
    pub max_consecutive_failures: u32,

    /// Longest wait for one captured input
    pub capture_timeout: Duration,

    /// Longest wait for one transcription
    pub transcribe_timeout: Duration,

    /// Speak the persona greeting when the session starts
    pub greet: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            capture_timeout: Duration::from_secs(60),
            transcribe_timeout: Duration::from_secs(30),
            greet: true,
        }
    }
}

/// Generative fallback model
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Whether fallback generation is attempted at all
    pub enabled: bool,

    /// Chat model identifier
    pub model: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Generation bounds
    pub max_tokens: u32,
    pub max_chars: usize,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let policy = FallbackPolicy::default();
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.7,
            max_tokens: policy.max_tokens,
            max_chars: policy.max_chars,
            timeout: policy.timeout,
        }
    }
}

impl LlmConfig {
    /// Generation bounds for the fallback arbiter
    #[must_use]
    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy {
            max_tokens: self.max_tokens,
            max_chars: self.max_chars,
            timeout: self.timeout,
            ..FallbackPolicy::default()
        }
    }
}

/// Which embedder backs the gate and the retriever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProvider {
    /// Offline feature hashing
    #[default]
    Local,
    /// OpenAI-compatible `/v1/embeddings`
    OpenAi,
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "hashing" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown embedding provider: {other}"))),
        }
    }
}

/// Embedding model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,

    /// Remote model identifier
    pub model: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Vector length of the local embedder
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: "text-embedding-3-small".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dimensions: crate::providers::HashingEmbedder::default().dimensions(),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier; `None` defers to the persona
    pub tts_voice: Option<String>,

    /// TTS speed multiplier (0.25 to 4.0); `None` defers to the persona
    pub tts_speed: Option<f32>,

    /// RMS energy above which audio counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence: Duration,

    /// Longest single capture window
    pub max_capture: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: None,
            tts_speed: None,
            energy_threshold: 0.02,
            silence: Duration::from_millis(800),
            max_capture: Duration::from_secs(15),
        }
    }
}

impl VoiceConfig {
    /// Voice to synthesize with: configured, else the persona's, else "alloy"
    #[must_use]
    pub fn voice_for<'a>(&'a self, persona: &'a Persona) -> &'a str {
        self.tts_voice
            .as_deref()
            .or_else(|| persona.tts_voice())
            .unwrap_or("alloy")
    }

    /// Speech rate: configured, else the persona's
    #[must_use]
    pub fn speed_for(&self, persona: &Persona) -> f32 {
        self.tts_speed.unwrap_or_else(|| persona.tts_speed())
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, embeddings, chat)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,
}

impl ApiKeys {
    /// Owned copy of the `OpenAI` key
    #[must_use]
    pub fn openai(&self) -> Option<SecretString> {
        copy_secret(self.openai.as_ref())
    }

    /// Owned copy of the `ElevenLabs` key
    #[must_use]
    pub fn elevenlabs(&self) -> Option<SecretString> {
        copy_secret(self.elevenlabs.as_ref())
    }

    /// Owned copy of the Deepgram key
    #[must_use]
    pub fn deepgram(&self) -> Option<SecretString> {
        copy_secret(self.deepgram.as_ref())
    }
}

fn copy_secret(secret: Option<&SecretString>) -> Option<SecretString> {
    secret.map(|s| SecretString::from(s.expose_secret().to_owned()))
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.trim().is_empty()).map(SecretString::from)
}

impl Config {
    /// Load configuration from the process environment and the standard file
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized
    pub fn from_sources<F>(fc: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ConfigFile {
            data,
            thresholds: th,
            session: se,
            llm: lf,
            embedding: ef,
            voice: vf,
            api_keys: kf,
        } = fc;

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(kf.openai)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(kf.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(kf.deepgram)),
        };

        // Data files (env dir > toml > embedded)
        let data_dir = env("BARISTA_DATA_DIR").or_else(|| data.dir.clone()).map(PathBuf::from);
        let data = DataPaths::resolve(data_dir.as_deref(), data);

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            acceptance: th.acceptance.unwrap_or(defaults.acceptance),
            relevance: th.relevance.unwrap_or(defaults.relevance),
            correction: CorrectionPolicy {
                one_edit_min_len: th
                    .one_edit_min_len
                    .unwrap_or(defaults.correction.one_edit_min_len),
                two_edit_min_len: th
                    .two_edit_min_len
                    .unwrap_or(defaults.correction.two_edit_min_len),
            },
        };

        let defaults = SessionSettings::default();
        let session = SessionSettings {
            max_consecutive_failures: se
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures)
                .max(1),
            capture_timeout: se
                .capture_timeout_secs
                .map_or(defaults.capture_timeout, Duration::from_secs),
            transcribe_timeout: se
                .transcribe_timeout_secs
                .map_or(defaults.transcribe_timeout, Duration::from_secs),
            greet: se.greet.unwrap_or(defaults.greet),
        };

        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            enabled: lf.enabled.unwrap_or(defaults.enabled),
            model: env("BARISTA_LLM_MODEL").or(lf.model).unwrap_or(defaults.model),
            base_url: env("BARISTA_LLM_BASE_URL")
                .or(lf.base_url)
                .unwrap_or(defaults.base_url),
            temperature: lf.temperature.unwrap_or(defaults.temperature),
            max_tokens: lf.max_tokens.unwrap_or(defaults.max_tokens),
            max_chars: lf.max_chars.unwrap_or(defaults.max_chars),
            timeout: lf.timeout_secs.map_or(defaults.timeout, Duration::from_secs),
        };

        let defaults = EmbeddingConfig::default();
        let embedding = EmbeddingConfig {
            provider: match env("BARISTA_EMBEDDING_PROVIDER").or(ef.provider) {
                Some(name) => name.parse()?,
                None => defaults.provider,
            },
            model: env("BARISTA_EMBEDDING_MODEL")
                .or(ef.model)
                .unwrap_or(defaults.model),
            base_url: ef.base_url.unwrap_or(defaults.base_url),
            dimensions: ef.dimensions.unwrap_or(defaults.dimensions).max(1),
        };

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_provider: match vf.stt_provider {
                Some(name) => name.parse()?,
                None => defaults.stt_provider,
            },
            stt_model: env("BARISTA_STT_MODEL")
                .or(vf.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_provider: match vf.tts_provider {
                Some(name) => name.parse()?,
                None => defaults.tts_provider,
            },
            tts_model: env("BARISTA_TTS_MODEL")
                .or(vf.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: vf.tts_voice.or(defaults.tts_voice),
            tts_speed: vf.tts_speed.or(defaults.tts_speed),
            energy_threshold: vf.energy_threshold.unwrap_or(defaults.energy_threshold),
            silence: vf.silence_ms.map_or(defaults.silence, Duration::from_millis),
            max_capture: vf
                .max_capture_secs
                .map_or(defaults.max_capture, Duration::from_secs),
        };

        Ok(Self {
            data,
            thresholds,
            session,
            llm,
            embedding,
            voice,
            api_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(ConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProvider::Local);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.session.max_consecutive_failures, 5);
        assert!(config.api_keys.openai.is_none());
        assert!(config.data.knowledge.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: ConfigFile = toml::from_str(
            r#"
            [llm]
            model = "from-file"
            max_tokens = 64

            [embedding]
            provider = "local"

            [api_keys]
            openai = "file-key"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("BARISTA_LLM_MODEL", "from-env"),
                ("BARISTA_EMBEDDING_PROVIDER", "openai"),
                ("OPENAI_API_KEY", "env-key"),
            ]),
        )
        .unwrap();

        assert_eq!(config.llm.model, "from-env");
        assert_eq!(config.llm.max_tokens, 64);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(
            config.api_keys.openai().map(|k| k.expose_secret().to_string()),
            Some("env-key".to_string())
        );
    }

    #[test]
    fn unknown_provider_is_error() {
        let result = Config::from_sources(
            ConfigFile::default(),
            env_from(&[("BARISTA_EMBEDDING_PROVIDER", "telepathy")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn data_dir_picks_up_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(KEYWORDS_FILE), "espresso\n").unwrap();

        let config = Config::from_sources(
            ConfigFile::default(),
            env_from(&[("BARISTA_DATA_DIR", dir.path().to_str().unwrap())]),
        )
        .unwrap();

        assert_eq!(config.data.keywords, Some(dir.path().join(KEYWORDS_FILE)));
        assert!(config.data.knowledge.is_none());
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let config =
            Config::from_sources(ConfigFile::default(), env_from(&[("OPENAI_API_KEY", " ")]))
                .unwrap();
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn voice_settings_defer_to_persona() {
        let persona = Persona::default();
        let config = Config::from_sources(ConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.voice.voice_for(&persona), "alloy");
        assert!((config.voice.speed_for(&persona) - 1.0).abs() < f32::EPSILON);

        let fc: ConfigFile = toml::from_str("[voice]\ntts_voice = \"nova\"\ntts_speed = 1.25\n").unwrap();
        let config = Config::from_sources(fc, env_from(&[])).unwrap();
        assert_eq!(config.voice.voice_for(&persona), "nova");
        assert!((config.voice.speed_for(&persona) - 1.25).abs() < f32::EPSILON);
    }
}
