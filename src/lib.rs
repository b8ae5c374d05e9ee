//! Barista Buddy - voice-driven coffee question answering
//!
//! This library provides the core functionality for Barista Buddy:
//! - Domain-vocabulary correction of transcribed speech
//! - A topic gate that keeps conversations about coffee
//! - FAQ retrieval by embedding similarity
//! - Constrained LLM fallback with answer validation
//! - A continuous listening session (microphone or text)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Input / Output                     │
//! │   Microphone + STT  │  stdin  │  TTS + Speaker      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                SessionController                    │
//! │   Listening → Transcribing → Resolving → Responding │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Query Pipeline                      │
//! │  Normalizer │ TopicGate │ Retriever │ Fallback      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Providers                          │
//! │        Embeddings  │  Chat completions              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod batch;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod persona;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod voice;

pub use assistant::{Assistant, AssistantData, Capabilities};
pub use batch::{BatchCase, BatchReport};
pub use config::Config;
pub use error::{Error, Result};
pub use knowledge::{KnowledgeBase, KnowledgeEntry, RetrievalResult, Retriever};
pub use persona::Persona;
pub use pipeline::{
    FallbackArbiter, NormalizedQuery, Normalizer, QueryPipeline, Resolution, Response,
    ResponseSource, TopicGate, Utterance,
};
pub use providers::{Embedder, Generator};
pub use session::{SessionController, SessionReport, SessionState, StopHandle, StopReason};
