//! Continuous listening session
//!
//! A single task drives the state machine:
//!
//! ```text
//! Idle ─► Listening ─► Transcribing ─► Resolving ─► Responding ─┐
//!             ▲   │          │  (text skips)                    │
//!             │   └──────────┼──────────────►                   │
//!             └──────────────┴── failure / silence ◄────────────┘
//!
//! any state ──stop signal / stop phrase / exhausted / failures──► Stopped
//! ```
//!
//! Each phase returns the next one; the controller never delivers anything
//! once a stop has been observed.

mod source;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

pub use source::{
    Capture, CaptureOutcome, CaptureWorker, CapturedInput, LineCapture, MicrophoneCapture,
    UtteranceSource,
};

use crate::pipeline::{
    NormalizedQuery, QueryPipeline, Resolution, StatsSnapshot, Utterance, tokenize,
};
use crate::voice::{AudioClip, Speaker, TranscribeError, Transcriber};
use crate::{Error, Result};

/// Phrases that end the session when spoken on their own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPhrases {
    phrases: Vec<String>,
}

impl Default for StopPhrases {
    fn default() -> Self {
        Self::new(["exit", "quit", "goodbye"])
    }
}

impl StopPhrases {
    /// Build from raw phrases; each is reduced to its space-joined tokens
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| tokenize(p.as_ref()).join(" "))
            .filter(|p| !p.is_empty())
            .collect();
        phrases.sort();
        phrases.dedup();
        Self { phrases }
    }

    /// Parse a one-phrase-per-line list; `#` starts a comment
    ///
    /// # Errors
    ///
    /// Returns error if the list has no phrases
    pub fn parse(content: &str) -> Result<Self> {
        let phrases = Self::new(
            content
                .lines()
                .map(|line| line.split('#').next().unwrap_or_default()),
        );
        if phrases.phrases.is_empty() {
            return Err(Error::Config("stop phrase list is empty".to_string()));
        }
        Ok(phrases)
    }

    /// Whether the whole query is a stop phrase
    #[must_use]
    pub fn matches(&self, query: &NormalizedQuery) -> bool {
        let text = query.token_text();
        self.phrases.iter().any(|p| *p == text)
    }

    /// Normalized phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

/// Listening loop settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Consecutive capture/transcription failures that end the session
    pub max_consecutive_failures: u32,

    /// Longest wait for one captured input
    pub capture_timeout: Duration,

    /// Longest wait for one transcription
    pub transcribe_timeout: Duration,

    pub stop_phrases: StopPhrases,

    /// Spoken once before the first turn
    pub greeting: Option<String>,

    /// Spoken after a stop phrase
    pub farewell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            capture_timeout: Duration::from_secs(60),
            transcribe_timeout: Duration::from_secs(30),
            stop_phrases: StopPhrases::default(),
            greeting: None,
            farewell: "Goodbye! Happy brewing!".to_string(),
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Listening,
    Transcribing,
    Resolving,
    Responding,
    Stopped,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Resolving => "resolving",
            Self::Responding => "responding",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The user said a stop phrase
    StopPhrase,
    /// An external stop was requested
    Signal,
    /// The input source ran dry
    InputExhausted,
    /// Capture or transcription kept failing
    TooManyFailures { failures: u32, last_error: String },
}

impl StopReason {
    /// Whether the session ended because of an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::TooManyFailures { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopPhrase => f.write_str("stop phrase"),
            Self::Signal => f.write_str("stop requested"),
            Self::InputExhausted => f.write_str("input exhausted"),
            Self::TooManyFailures {
                failures,
                last_error,
            } => write!(f, "{failures} consecutive failures (last: {last_error})"),
        }
    }
}

/// Requests a running session to stop
///
/// Cloneable and usable from any task; outstanding waits are aborted.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the session to stop
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// One delivered turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub utterance: Utterance,

    /// `None` when the utterance was a stop phrase
    pub resolution: Option<Resolution>,

    /// Whether the speaker reported success
    pub delivered: bool,
}

/// Summary returned when a session ends
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub turns: u64,
    pub stop_reason: StopReason,
    pub history: Vec<TurnRecord>,
    pub stats: StatsSnapshot,
}

struct PendingTurn {
    turn: u64,
    utterance: Utterance,
    resolution: Option<Resolution>,
}

enum Phase {
    Idle,
    Listening,
    Transcribing(AudioClip),
    Resolving(Utterance),
    Responding(PendingTurn),
    Stopped(StopReason),
}

impl Phase {
    const fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Listening => SessionState::Listening,
            Self::Transcribing(_) => SessionState::Transcribing,
            Self::Resolving(_) => SessionState::Resolving,
            Self::Responding(_) => SessionState::Responding,
            Self::Stopped(_) => SessionState::Stopped,
        }
    }
}

/// Drives listen → resolve → respond until stopped
pub struct SessionController {
    id: Uuid,
    pipeline: Arc<QueryPipeline>,
    source: Box<dyn UtteranceSource>,
    transcriber: Option<Arc<dyn Transcriber>>,
    speaker: Arc<dyn Speaker>,
    config: SessionConfig,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SessionState>,
    turns: u64,
    failures: u32,
    history: Vec<TurnRecord>,
}

impl SessionController {
    /// Create a session in the `Idle` state
    #[must_use]
    pub fn new(
        pipeline: Arc<QueryPipeline>,
        source: Box<dyn UtteranceSource>,
        speaker: Arc<dyn Speaker>,
        config: SessionConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            pipeline,
            source,
            transcriber: None,
            speaker,
            config,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            state_tx,
            turns: 0,
            failures: 0,
            history: Vec::new(),
        }
    }

    /// Transcriber for audio input; text input never needs one
    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Handle that stops this session from elsewhere
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Run until the session stops
    pub async fn run(mut self) -> SessionReport {
        let span = tracing::info_span!("session", id = %self.id);
        let stop_reason = self.drive().instrument(span.clone()).await;

        let stats = self.pipeline.stats();
        span.in_scope(|| {
            if stop_reason.is_error() {
                tracing::error!(turns = self.turns, reason = %stop_reason, %stats, "session ended");
            } else {
                tracing::info!(turns = self.turns, reason = %stop_reason, %stats, "session ended");
            }
        });

        SessionReport {
            session_id: self.id,
            turns: self.turns,
            stop_reason,
            history: self.history,
            stats,
        }
    }

    async fn drive(&mut self) -> StopReason {
        tracing::info!("session started");
        let mut phase = Phase::Idle;

        loop {
            let state = phase.state();
            tracing::trace!(%state, "entering state");
            self.state_tx.send_replace(state);

            phase = match phase {
                Phase::Idle => self.start().await,
                Phase::Listening => self.listen().await,
                Phase::Transcribing(clip) => self.transcribe(&clip).await,
                Phase::Resolving(utterance) => self.resolve(utterance).await,
                Phase::Responding(pending) => self.respond(pending).await,
                Phase::Stopped(reason) => return reason,
            };
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    async fn start(&mut self) -> Phase {
        let Some(greeting) = self.config.greeting.clone() else {
            return Phase::Listening;
        };

        match abortable(&mut self.stop_rx, self.speaker.speak(&greeting)).await {
            None => Phase::Stopped(StopReason::Signal),
            Some(result) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "greeting delivery failed");
                }
                Phase::Listening
            }
        }
    }

    async fn listen(&mut self) -> Phase {
        if self.stop_requested() {
            return Phase::Stopped(StopReason::Signal);
        }

        let wait = tokio::time::timeout(self.config.capture_timeout, self.source.next_input());
        let outcome = match abortable(&mut self.stop_rx, wait).await {
            None => return Phase::Stopped(StopReason::Signal),
            Some(Err(_)) => return self.fail("capture timed out"),
            Some(Ok(outcome)) => outcome,
        };

        match outcome {
            CaptureOutcome::Input(CapturedInput::Audio(clip)) => Phase::Transcribing(clip),
            CaptureOutcome::Input(CapturedInput::Text(text)) => {
                self.failures = 0;
                Phase::Resolving(Utterance::new(text))
            }
            CaptureOutcome::Silence => {
                tracing::debug!("no speech captured");
                Phase::Listening
            }
            CaptureOutcome::Exhausted => Phase::Stopped(StopReason::InputExhausted),
            CaptureOutcome::Failed(message) => self.fail(&format!("capture failed: {message}")),
        }
    }

    async fn transcribe(&mut self, clip: &AudioClip) -> Phase {
        let Some(transcriber) = self.transcriber.clone() else {
            return self.fail("audio captured but no transcriber is configured");
        };

        let wait = tokio::time::timeout(self.config.transcribe_timeout, transcriber.transcribe(clip));
        match abortable(&mut self.stop_rx, wait).await {
            None => Phase::Stopped(StopReason::Signal),
            Some(Err(_)) => self.fail("transcription timed out"),
            Some(Ok(Err(TranscribeError::NoSpeech))) => self.fail("no speech in transcript"),
            Some(Ok(Err(TranscribeError::Engine(message)))) => {
                self.fail(&format!("transcription failed: {message}"))
            }
            Some(Ok(Ok(utterance))) if utterance.text.trim().is_empty() => {
                self.fail("empty transcript")
            }
            Some(Ok(Ok(utterance))) => {
                self.failures = 0;
                tracing::debug!(text = %utterance.text, confidence = ?utterance.confidence, "transcribed");
                Phase::Resolving(utterance)
            }
        }
    }

    async fn resolve(&mut self, utterance: Utterance) -> Phase {
        self.turns += 1;
        let turn = self.turns;

        let query = self.pipeline.normalizer().normalize(&utterance.text);
        if self.config.stop_phrases.matches(&query) {
            tracing::info!(turn, phrase = %query.token_text(), "stop phrase heard");
            return Phase::Responding(PendingTurn {
                turn,
                utterance,
                resolution: None,
            });
        }

        match abortable(&mut self.stop_rx, self.pipeline.resolve_normalized(query)).await {
            None => Phase::Stopped(StopReason::Signal),
            Some(resolution) => {
                tracing::info!(
                    turn,
                    query = %resolution.query.text,
                    source = %resolution.response.source,
                    "query resolved"
                );
                Phase::Responding(PendingTurn {
                    turn,
                    utterance,
                    resolution: Some(resolution),
                })
            }
        }
    }

    async fn respond(&mut self, pending: PendingTurn) -> Phase {
        if self.stop_requested() {
            return Phase::Stopped(StopReason::Signal);
        }

        let text = pending
            .resolution
            .as_ref()
            .map_or(self.config.farewell.as_str(), |r| r.response.text.as_str());

        let delivered = match abortable(&mut self.stop_rx, self.speaker.speak(text)).await {
            None => return Phase::Stopped(StopReason::Signal),
            Some(Ok(())) => true,
            Some(Err(e)) => {
                tracing::warn!(turn = pending.turn, error = %e, "response delivery failed");
                false
            }
        };

        let farewell = pending.resolution.is_none();
        self.history.push(TurnRecord {
            turn: pending.turn,
            utterance: pending.utterance,
            resolution: pending.resolution,
            delivered,
        });

        if farewell {
            Phase::Stopped(StopReason::StopPhrase)
        } else {
            Phase::Listening
        }
    }

    fn fail(&mut self, reason: &str) -> Phase {
        self.failures += 1;
        let max = self.config.max_consecutive_failures;

        if self.failures >= max {
            return Phase::Stopped(StopReason::TooManyFailures {
                failures: self.failures,
                last_error: reason.to_string(),
            });
        }

        tracing::warn!(failures = self.failures, max, reason, "input failed, listening again");
        Phase::Listening
    }
}

/// Run `fut` unless a stop is signalled first
async fn abortable<F: Future>(stop: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stop.wait_for(|stopped| *stopped) => None,
        output = fut => Some(output),
    }
}
