//! Shared test utilities
//!
//! Mock capabilities with call counters, and a small knowledge base whose
//! similarities are easy to reason about.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use barista_buddy::config::Thresholds;
use barista_buddy::knowledge::{KnowledgeArtifact, KnowledgeRecord};
use barista_buddy::pipeline::{FallbackPolicy, Utterance, tokenize};
use barista_buddy::providers::{Embedder, GenerateError, GenerationRequest, Generator};
use barista_buddy::session::{CaptureOutcome, CapturedInput, StopHandle, UtteranceSource};
use barista_buddy::voice::{AudioClip, Speaker, TranscribeError, Transcriber};
use barista_buddy::{Assistant, AssistantData, Capabilities, Error, Result};

/// Words the mock embedder knows; everything else is ignored
pub const VOCABULARY: &[&str] = &[
    "espresso", "latte", "cappuccino", "bitter", "coffee", "make", "milk", "roast", "joke",
    "weather", "capital", "france", "paris",
];

pub const ESPRESSO_ANSWER: &str =
    "Pack about 18 grams of finely ground coffee and extract for 25 to 30 seconds.";
pub const LATTE_ANSWER: &str = "Pull a shot of espresso and top it with steamed milk and a thin layer of foam.";

/// Four entries; each question embeds to a distinct vector
pub fn test_knowledge() -> KnowledgeArtifact {
    let record = |question: &str, answer: &str| KnowledgeRecord {
        question: question.to_string(),
        answer: answer.to_string(),
        tags: Vec::new(),
    };

    KnowledgeArtifact {
        entries: vec![
            record("How do I make an espresso?", ESPRESSO_ANSWER),
            record("How do I make a latte?", LATTE_ANSWER),
            record(
                "What is a cappuccino?",
                "A cappuccino is equal parts espresso, steamed milk and milk foam.",
            ),
            record(
                "Why is my coffee bitter?",
                "Bitter coffee usually means over-extraction; try a coarser grind.",
            ),
        ],
        embeddings: None,
    }
}

/// Bag-of-words embedder over [`VOCABULARY`], counting calls
#[derive(Default)]
pub struct VocabEmbedder {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl VocabEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; VOCABULARY.len()];
        for token in tokenize(text) {
            if let Some(i) = VOCABULARY.iter().position(|w| *w == token) {
                vector[i] += 1.0;
            }
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for VocabEmbedder {
    fn model_id(&self) -> &str {
        "vocab-test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Embedding("embedder offline".to_string()));
        }
        Ok(Self::vector(text))
    }
}

/// What the mock generator does when called
#[derive(Clone)]
pub enum Generation {
    Reply(String),
    Fail(String),
    Hang,
}

/// Generator with a fixed behavior and a call counter
pub struct ScriptedGenerator {
    behavior: Mutex<Generation>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedGenerator {
    pub fn new(behavior: Generation) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(Generation::Reply(text.to_string()))
    }

    pub fn set(&self, behavior: Generation) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(request.prompt.clone());

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Generation::Reply(text) => Ok(text),
            Generation::Fail(message) => Err(GenerateError::Engine(message)),
            Generation::Hang => std::future::pending().await,
        }
    }
}

/// Assistant over [`test_knowledge`] with inspectable mocks
pub struct Harness {
    pub assistant: Assistant,
    pub embedder: Arc<VocabEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
}

impl Harness {
    pub async fn new(generator: ScriptedGenerator) -> Self {
        let mut data = AssistantData::embedded().unwrap();
        data.knowledge = test_knowledge();

        let embedder = Arc::new(VocabEmbedder::default());
        let generator = Arc::new(generator);
        let capabilities = Capabilities {
            embedder: embedder.clone(),
            generator: generator.clone(),
        };
        let policy = FallbackPolicy {
            timeout: Duration::from_millis(200),
            ..FallbackPolicy::default()
        };

        let assistant = Assistant::build(data, capabilities, &Thresholds::default(), policy)
            .await
            .unwrap();

        Self {
            assistant,
            embedder,
            generator,
        }
    }
}

/// Speaker that records what it was asked to say
#[derive(Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<String>>,
    failing: AtomicBool,
    stop_after: Mutex<Option<(usize, StopHandle)>>,
}

impl RecordingSpeaker {
    pub fn failing() -> Self {
        let speaker = Self::default();
        speaker.failing.store(true, Ordering::SeqCst);
        speaker
    }

    /// Request a stop while delivering the `n`th text
    pub fn stop_after(&self, n: usize, handle: StopHandle) {
        *self.stop_after.lock().unwrap() = Some((n, handle));
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let count = {
            let mut spoken = self.spoken.lock().unwrap();
            spoken.push(text.to_string());
            spoken.len()
        };

        if let Some((n, handle)) = self.stop_after.lock().unwrap().as_ref() {
            if count == *n {
                handle.stop();
            }
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Tts("speaker unplugged".to_string()));
        }
        Ok(())
    }
}

/// Source replaying fixed outcomes
pub struct ScriptedSource {
    script: VecDeque<CaptureOutcome>,
    hang_when_empty: bool,
    consumed: Arc<AtomicUsize>,
}

impl ScriptedSource {
    /// Replays `script`, then reports `Exhausted`
    pub fn new(script: impl IntoIterator<Item = CaptureOutcome>) -> Self {
        Self {
            script: script.into_iter().collect(),
            hang_when_empty: false,
            consumed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replays `script`, then waits forever
    pub fn then_hang(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Counter of outcomes handed out
    pub fn consumed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.consumed)
    }
}

#[async_trait]
impl UtteranceSource for ScriptedSource {
    async fn next_input(&mut self) -> CaptureOutcome {
        match self.script.pop_front() {
            Some(outcome) => {
                self.consumed.fetch_add(1, Ordering::SeqCst);
                outcome
            }
            None if self.hang_when_empty => std::future::pending().await,
            None => CaptureOutcome::Exhausted,
        }
    }
}

pub fn text(s: &str) -> CaptureOutcome {
    CaptureOutcome::Input(CapturedInput::Text(s.to_string()))
}

pub fn audio() -> CaptureOutcome {
    CaptureOutcome::Input(CapturedInput::Audio(AudioClip::new(vec![0.1; 1600], 16000)))
}

/// Transcriber replaying fixed results, then reporting no speech
#[derive(Default)]
pub struct ScriptedTranscriber {
    results: Mutex<VecDeque<std::result::Result<String, TranscribeError>>>,
    calls: AtomicUsize,
    hang: bool,
}

impl ScriptedTranscriber {
    pub fn new(results: impl IntoIterator<Item = std::result::Result<&'static str, TranscribeError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().map(|r| r.map(str::to_string)).collect()),
            calls: AtomicUsize::new(0),
            hang: false,
        }
    }

    /// Never returns a transcript
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &AudioClip) -> std::result::Result<Utterance, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            return std::future::pending().await;
        }
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or(Err(TranscribeError::NoSpeech)).map(Utterance::new)
    }
}
