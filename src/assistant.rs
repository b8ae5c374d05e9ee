//! Startup wiring
//!
//! Loads the read-only data files (compiled-in defaults, each overridable by
//! a path), picks the embedding and generation backends from configuration,
//! and assembles the query pipeline once.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, DataPaths, EmbeddingProvider, SessionSettings, Thresholds};
use crate::knowledge::{KnowledgeArtifact, KnowledgeBase, Retriever};
use crate::persona::Persona;
use crate::pipeline::{
    FallbackArbiter, FallbackPolicy, KeywordSet, Lexicon, Normalizer, QueryPipeline, Resolution,
    TopicGate,
};
use crate::providers::{
    DEFAULT_BASE_URL, DisabledGenerator, Embedder, Generator, HashingEmbedder, OpenAiEmbedder,
    OpenAiGenerator,
};
use crate::session::{SessionConfig, StopPhrases};
use crate::{Error, Result};

const EMBEDDED_LEXICON: &str = include_str!("../data/pronunciation_dict.json");
const EMBEDDED_KEYWORDS: &str = include_str!("../data/coffee_keywords.txt");
const EMBEDDED_STOP_PHRASES: &str = include_str!("../data/stop_phrases.txt");

/// Parsed data files, before anything is embedded
#[derive(Debug, Clone)]
pub struct AssistantData {
    pub persona: Persona,
    pub lexicon: Lexicon,
    pub keywords: KeywordSet,
    pub stop_phrases: StopPhrases,
    pub knowledge: KnowledgeArtifact,
}

impl AssistantData {
    /// The data compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if an embedded file is malformed
    pub fn embedded() -> Result<Self> {
        Self::load(&DataPaths::default())
    }

    /// Load each file from its configured path, or the embedded default
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or fails validation
    pub fn load(paths: &DataPaths) -> Result<Self> {
        let persona = match &paths.persona {
            Some(path) => Persona::from_path(path)?,
            None => Persona::embedded()?,
        };

        let knowledge = match &paths.knowledge {
            Some(path) => KnowledgeArtifact::from_path(path)?,
            None => KnowledgeArtifact::embedded()?,
        };

        let lexicon = Lexicon::from_json(&read_or(paths.lexicon.as_deref(), EMBEDDED_LEXICON)?)?;
        let keywords = KeywordSet::parse(&read_or(paths.keywords.as_deref(), EMBEDDED_KEYWORDS)?)?;
        let stop_phrases =
            StopPhrases::parse(&read_or(paths.stop_phrases.as_deref(), EMBEDDED_STOP_PHRASES)?)?;

        tracing::debug!(
            persona = %persona.id(),
            records = knowledge.entries.len(),
            lexicon_terms = lexicon.len(),
            keywords = keywords.len(),
            stop_phrases = stop_phrases.phrases().len(),
            "loaded assistant data"
        );

        Ok(Self {
            persona,
            lexicon,
            keywords,
            stop_phrases,
            knowledge,
        })
    }
}

fn read_or(path: Option<&Path>, embedded: &str) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display()))),
        None => Ok(embedded.to_string()),
    }
}

/// Model backends the pipeline calls
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

impl Capabilities {
    /// Hashing embedder and no generator; needs no network
    #[must_use]
    pub fn offline(dimensions: usize) -> Self {
        Self {
            embedder: Arc::new(HashingEmbedder::new(dimensions)),
            generator: Arc::new(DisabledGenerator),
        }
    }

    /// Choose backends from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the remote embedder is selected against the `OpenAI`
    /// endpoint without an API key
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match config.embedding.provider {
            EmbeddingProvider::Local => Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
            EmbeddingProvider::OpenAi => {
                let api_key = config.api_keys.openai();
                if api_key.is_none() && config.embedding.base_url == DEFAULT_BASE_URL {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for the openai embedding provider".to_string(),
                    ));
                }
                Arc::new(OpenAiEmbedder::new(
                    &config.embedding.base_url,
                    api_key,
                    config.embedding.model.clone(),
                ))
            }
        };

        let generator: Arc<dyn Generator> = if !config.llm.enabled {
            tracing::info!("fallback generation disabled");
            Arc::new(DisabledGenerator)
        } else if config.api_keys.openai.is_none() && config.llm.base_url == DEFAULT_BASE_URL {
            tracing::warn!("no OPENAI_API_KEY set, fallback generation disabled");
            Arc::new(DisabledGenerator)
        } else {
            Arc::new(
                OpenAiGenerator::new(
                    &config.llm.base_url,
                    config.api_keys.openai(),
                    config.llm.model.clone(),
                )
                .with_temperature(config.llm.temperature),
            )
        };

        Ok(Self {
            embedder,
            generator,
        })
    }
}

/// A ready-to-use assistant: persona plus the assembled pipeline
pub struct Assistant {
    persona: Persona,
    stop_phrases: StopPhrases,
    knowledge: Arc<KnowledgeBase>,
    pipeline: Arc<QueryPipeline>,
}

impl Assistant {
    /// Build the knowledge base and wire the pipeline
    ///
    /// Every knowledge-base question is embedded here, once.
    ///
    /// # Errors
    ///
    /// Returns error if the knowledge base cannot be built
    pub async fn build(
        data: AssistantData,
        capabilities: Capabilities,
        thresholds: &Thresholds,
        policy: FallbackPolicy,
    ) -> Result<Self> {
        let AssistantData {
            persona,
            lexicon,
            keywords,
            stop_phrases,
            knowledge,
        } = data;
        let Capabilities {
            embedder,
            generator,
        } = capabilities;

        let normalizer = Arc::new(Normalizer::new(lexicon, thresholds.correction));
        let knowledge = Arc::new(KnowledgeBase::build(knowledge, &normalizer, embedder.as_ref()).await?);

        let gate = Arc::new(TopicGate::new(
            keywords,
            Arc::clone(&embedder),
            knowledge.centroid().to_vec(),
            thresholds.relevance,
        ));
        let retriever = Retriever::new(Arc::clone(&knowledge), Arc::clone(&embedder), thresholds.acceptance);
        let arbiter = FallbackArbiter::new(
            Arc::clone(&generator),
            Arc::clone(&gate),
            persona.preamble(),
            persona.name(),
            policy,
        );
        let pipeline = QueryPipeline::new(normalizer, gate, retriever, arbiter, persona.pipeline_replies());

        tracing::info!(
            persona = %persona.name(),
            entries = knowledge.len(),
            embedder = %embedder.model_id(),
            generator = %generator.model_id(),
            acceptance = thresholds.acceptance,
            relevance = thresholds.relevance,
            "assistant ready"
        );

        Ok(Self {
            persona,
            stop_phrases,
            knowledge,
            pipeline: Arc::new(pipeline),
        })
    }

    #[must_use]
    pub const fn persona(&self) -> &Persona {
        &self.persona
    }

    #[must_use]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Shared handle to the pipeline
    #[must_use]
    pub fn pipeline(&self) -> Arc<QueryPipeline> {
        Arc::clone(&self.pipeline)
    }

    /// Answer one query outside a session
    pub async fn ask(&self, text: &str) -> Resolution {
        self.pipeline.resolve(text).await
    }

    /// Session settings with this persona's greeting, farewell and stop phrases
    #[must_use]
    pub fn session_config(&self, settings: &SessionSettings) -> SessionConfig {
        SessionConfig {
            max_consecutive_failures: settings.max_consecutive_failures,
            capture_timeout: settings.capture_timeout,
            transcribe_timeout: settings.transcribe_timeout,
            stop_phrases: self.stop_phrases.clone(),
            greeting: settings.greet.then(|| self.persona.greeting().to_string()),
            farewell: self.persona.farewell().to_string(),
        }
    }
}
