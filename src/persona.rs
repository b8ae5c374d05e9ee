//! Persona configuration
//!
//! A persona carries the assistant's identity, voice settings, the preamble
//! used for constrained generation, and the fixed reply texts (greeting,
//! farewell, refusal, apology). The default persona is compiled in; a file
//! path in configuration replaces it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::Replies;
use crate::{Error, Result};

/// Persona compiled into the binary
const EMBEDDED_PERSONA: &str = include_str!("../personas/barista-buddy.json");

/// Identity, voice and reply texts of the assistant
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Semantic version of this persona file
    pub version: String,

    /// Core identity (required)
    pub identity: Identity,

    /// Voice and audio configuration
    pub voice: Option<Voice>,

    /// Behavior and communication style
    pub personality: Option<Personality>,

    /// Fixed spoken replies
    #[serde(default)]
    pub replies: PersonaReplies,
}

/// Core identity of the assistant
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Unique identifier
    pub id: String,

    /// Display name, also the assistant cue in generation prompts
    pub name: String,

    /// Short descriptive phrase
    pub tagline: Option<String>,

    /// Entity type classification
    #[serde(rename = "type")]
    pub entity_type: Option<EntityType>,
}

/// Entity type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Assistant,
    Bot,
    Character,
    Mascot,
}

/// Voice and audio configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    /// Text-to-speech configuration
    pub tts: Option<TtsConfig>,

    /// Speech-to-text configuration
    pub stt: Option<SttConfig>,
}

/// TTS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsConfig {
    /// Voice identifier
    pub voice: Option<String>,

    /// Speech rate multiplier
    #[serde(default = "default_tts_speed")]
    pub speed: f32,
}

/// STT configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SttConfig {
    /// Model identifier
    pub model: Option<String>,

    /// Primary language (BCP 47 code)
    pub language: Option<String>,
}

/// Behavior and communication style
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    /// Preamble placed before the user turn in generation prompts
    pub system_prompt: Option<String>,

    /// Default communication tone
    pub tone: Option<String>,

    /// Default response length
    pub verbosity: Option<String>,

    /// Areas of specialized knowledge
    #[serde(default)]
    pub expertise: Vec<String>,
}

/// Fixed reply texts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaReplies {
    /// Spoken when a session starts
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Spoken when the user says a stop phrase
    #[serde(default = "default_farewell")]
    pub farewell: String,

    /// Returned for off-topic questions
    #[serde(default = "default_refusal")]
    pub refusal: String,

    /// Returned when no usable answer could be produced
    #[serde(default = "default_apology")]
    pub apology: String,
}

impl Default for PersonaReplies {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            farewell: default_farewell(),
            refusal: default_refusal(),
            apology: default_apology(),
        }
    }
}

// Default value functions

const fn default_tts_speed() -> f32 {
    1.0
}

fn default_greeting() -> String {
    "Hello! I'm Barista Buddy. How can I help you?".to_string()
}

fn default_farewell() -> String {
    "Goodbye! Happy brewing!".to_string()
}

fn default_refusal() -> String {
    "Sorry, I can only help with coffee-related questions.".to_string()
}

fn default_apology() -> String {
    "Sorry, I don't have a good answer for that coffee question.".to_string()
}

const DEFAULT_PREAMBLE: &str = "You are Barista Buddy, a coffee-only assistant. Only answer questions related to coffee. If the question is not about coffee, say: 'Sorry, I can only answer coffee questions.'";

impl Persona {
    /// Parse a persona from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the name is empty
    pub fn from_json(json: &str) -> Result<Self> {
        let persona: Self = serde_json::from_str(json)
            .map_err(|e| Error::Persona(format!("invalid persona: {e}")))?;
        if persona.identity.name.trim().is_empty() {
            return Err(Error::Persona("persona name must not be empty".to_string()));
        }
        Ok(persona)
    }

    /// Load a persona file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let persona = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), id = %persona.id(), "loaded persona");
        Ok(persona)
    }

    /// The persona compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if the embedded JSON is malformed
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_PERSONA)
    }

    /// Get the unique identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.identity.id
    }

    /// Get the display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Generation preamble, falling back to the built-in coffee-only wording
    #[must_use]
    pub fn preamble(&self) -> &str {
        self.personality
            .as_ref()
            .and_then(|p| p.system_prompt.as_deref())
            .unwrap_or(DEFAULT_PREAMBLE)
    }

    /// Get the TTS voice identifier
    #[must_use]
    pub fn tts_voice(&self) -> Option<&str> {
        self.voice.as_ref()?.tts.as_ref()?.voice.as_deref()
    }

    /// Get the TTS speech rate
    #[must_use]
    pub fn tts_speed(&self) -> f32 {
        self.voice
            .as_ref()
            .and_then(|v| v.tts.as_ref())
            .map_or(1.0, |tts| tts.speed)
    }

    /// Get the STT language
    #[must_use]
    pub fn stt_language(&self) -> Option<&str> {
        self.voice.as_ref()?.stt.as_ref()?.language.as_deref()
    }

    /// Greeting spoken at session start
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.replies.greeting
    }

    /// Farewell spoken on a stop phrase
    #[must_use]
    pub fn farewell(&self) -> &str {
        &self.replies.farewell
    }

    /// Reply texts used by the query pipeline
    #[must_use]
    pub fn pipeline_replies(&self) -> Replies {
        Replies {
            refusal: self.replies.refusal.clone(),
            apology: self.replies.apology.clone(),
        }
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            identity: Identity {
                id: "barista-buddy".to_string(),
                name: "Barista Buddy".to_string(),
                tagline: None,
                entity_type: Some(EntityType::Assistant),
            },
            voice: None,
            personality: None,
            replies: PersonaReplies::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_persona_parses() {
        let p = Persona::embedded().unwrap();
        assert_eq!(p.id(), "barista-buddy");
        assert_eq!(p.name(), "Barista Buddy");
        assert_eq!(p.greeting(), "Hello! I'm Barista Buddy. How can I help you?");
        assert_eq!(p.farewell(), "Goodbye! Happy brewing!");
        assert!(p.preamble().contains("coffee-only"));
        assert_eq!(p.tts_voice(), Some("alloy"));
    }

    #[test]
    fn missing_replies_use_defaults() {
        let p = Persona::from_json(r#"{"version":"1.0.0","identity":{"id":"x","name":"Bean Bot"}}"#)
            .unwrap();
        assert_eq!(
            p.pipeline_replies().refusal,
            "Sorry, I can only help with coffee-related questions."
        );
        assert!(p.preamble().starts_with("You are Barista Buddy"));
        assert!((p.tts_speed() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Persona::from_json(r#"{"version":"1","identity":{"id":"x","name":" "}}"#).is_err());
    }

    #[test]
    fn default_persona_is_barista() {
        let p = Persona::default();
        assert_eq!(p.name(), "Barista Buddy");
        assert_eq!(p.identity.entity_type, Some(EntityType::Assistant));
        assert_eq!(p.stt_language(), None);
    }
}
