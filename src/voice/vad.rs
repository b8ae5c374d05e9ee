//! Energy-based voice activity detection
//!
//! Segments a stream of microphone samples into utterances: speech starts
//! when a chunk's RMS energy crosses the threshold and ends after enough
//! trailing silence.

use std::time::Duration;

use super::SAMPLE_RATE;

/// Detector thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Shortest segment worth transcribing, in samples
    pub min_speech_samples: usize,

    /// Trailing silence that ends a segment, in samples
    pub silence_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            // 0.3 seconds
            min_speech_samples: 4800,
            // 0.8 seconds
            silence_samples: 12800,
        }
    }
}

impl VadConfig {
    /// Build from wall-clock durations at the capture sample rate
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_durations(energy_threshold: f32, silence: Duration) -> Self {
        Self {
            energy_threshold,
            silence_samples: (silence.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize,
            ..Self::default()
        }
    }
}

/// State of the speech detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Speaking,
}

/// Segments utterances from streamed audio
#[derive(Debug)]
pub struct SpeechDetector {
    config: VadConfig,
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl SpeechDetector {
    /// Create a detector
    #[must_use]
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns the completed segment once speech has been followed by enough
    /// silence; the detector is then back in `Idle`.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            DetectorState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.config.silence_samples {
                    if self.speech_buffer.len() > self.config.min_speech_samples {
                        tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                        let segment = std::mem::take(&mut self.speech_buffer);
                        self.reset();
                        return Some(segment);
                    }
                    // Too short: a click or a cough
                    tracing::trace!("discarding short segment");
                    self.reset();
                }
                None
            }
        }
    }

    /// Samples accumulated for the segment in progress
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Take whatever speech has accumulated, if long enough to transcribe
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let segment = std::mem::take(&mut self.speech_buffer);
        self.reset();
        (segment.len() > self.config.min_speech_samples).then_some(segment)
    }

    /// Reset detector to idle state
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
