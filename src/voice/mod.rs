//! Voice processing module
//!
//! Microphone capture with energy-based utterance segmentation, speech-to-text
//! and text-to-speech HTTP clients, and speaker playback. The session only
//! sees the [`Transcriber`] and [`Speaker`] traits.

mod capture;
mod playback;
mod speaker;
mod stt;
mod tts;
mod vad;

use async_trait::async_trait;
use thiserror::Error;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use speaker::{ConsoleSpeaker, VoiceSpeaker};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
pub use vad::{DetectorState, SpeechDetector, VadConfig, calculate_energy};

use crate::pipeline::Utterance;

/// Mono PCM audio captured for one utterance
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,

    /// Samples per second
    pub sample_rate: u32,
}

impl AudioClip {
    /// Wrap captured samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Clip length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> crate::Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }
}

/// Failure modes of the `transcribe` capability
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// The audio contained no recognizable speech
    #[error("no speech detected")]
    NoSpeech,

    /// Backend failed
    #[error("transcription engine error: {0}")]
    Engine(String),
}

/// Converts captured audio to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance
    ///
    /// # Errors
    ///
    /// Returns `NoSpeech` for an empty transcript, `Engine` on backend failure
    async fn transcribe(&self, audio: &AudioClip) -> Result<Utterance, TranscribeError>;
}

/// Delivers response text to the user
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Deliver text, returning once delivery has finished
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails; callers treat this as non-fatal
    async fn speak(&self, text: &str) -> crate::Result<()>;
}
