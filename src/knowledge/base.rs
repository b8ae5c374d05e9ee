//! Knowledge base artifact loading and one-time embedding

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::Normalizer;
use crate::providers::Embedder;
use crate::{Error, Result};

use super::retriever::mean_vector;

/// Knowledge base compiled into the binary
const EMBEDDED_KNOWLEDGE: &str = include_str!("../../data/coffee_knowledge.json");

/// One question/answer record as stored in the artifact
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeRecord {
    /// Canonical question
    #[serde(default)]
    pub question: String,

    /// Stored answer
    #[serde(default)]
    pub answer: String,

    /// Optional topic tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Pre-computed vectors shipped alongside the records
///
/// Vectors must have been computed over the normalized question text with the
/// named model; they are ignored when the active embedder differs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrecomputedEmbeddings {
    /// Embedding model used to generate vectors
    pub model: String,

    /// Map from record index (as string) to embedding vector
    pub vectors: HashMap<String, Vec<f32>>,
}

/// Parsed knowledge base artifact
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeArtifact {
    /// Records in insertion order
    pub entries: Vec<KnowledgeRecord>,

    /// Optional pre-computed embeddings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<PrecomputedEmbeddings>,
}

/// Accepted on-disk layouts: a bare record list or a full artifact object
#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactFormat {
    Records(Vec<KnowledgeRecord>),
    Artifact(KnowledgeArtifact),
}

impl KnowledgeArtifact {
    /// Parse an artifact from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON matches neither layout
    pub fn from_json(json: &str) -> Result<Self> {
        let format: ArtifactFormat = serde_json::from_str(json)
            .map_err(|e| Error::KnowledgeBase(format!("invalid knowledge artifact: {e}")))?;

        Ok(match format {
            ArtifactFormat::Records(entries) => Self {
                entries,
                embeddings: None,
            },
            ArtifactFormat::Artifact(artifact) => artifact,
        })
    }

    /// Read and parse an artifact file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let artifact = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), records = artifact.entries.len(), "loaded knowledge artifact");
        Ok(artifact)
    }

    /// The artifact compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if the embedded JSON is malformed
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_KNOWLEDGE)
    }
}

/// A stored question/answer pair with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    /// Insertion position in the knowledge base
    pub index: usize,

    /// Question as written in the artifact
    pub question: String,

    /// Question after domain normalization (the embedded text)
    pub normalized_question: String,

    /// Stored answer
    pub answer: String,

    /// Optional topic tags
    pub tags: Vec<String>,

    /// Embedding of `normalized_question`
    pub embedding: Vec<f32>,
}

/// Fixed, insertion-ordered FAQ collection
///
/// Built once at startup; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    centroid: Vec<f32>,
    model_id: String,
}

impl KnowledgeBase {
    /// Build the knowledge base, embedding every question exactly once
    ///
    /// Records with an empty question or answer are skipped. Pre-computed
    /// vectors are used when their model matches `embedder`.
    ///
    /// # Errors
    ///
    /// Returns error if no usable records remain, embedding fails, or the
    /// vectors disagree in length
    pub async fn build(
        artifact: KnowledgeArtifact,
        normalizer: &Normalizer,
        embedder: &dyn Embedder,
    ) -> Result<Self> {
        let KnowledgeArtifact {
            entries: records,
            embeddings,
        } = artifact;

        let precomputed = embeddings.filter(|e| {
            let matches = e.model == embedder.model_id();
            if !matches {
                tracing::warn!(
                    artifact_model = %e.model,
                    embedder_model = %embedder.model_id(),
                    "ignoring pre-computed embeddings from a different model"
                );
            }
            matches
        });

        let mut kept: Vec<(usize, KnowledgeRecord)> = Vec::with_capacity(records.len());
        for (raw_index, record) in records.into_iter().enumerate() {
            if record.question.trim().is_empty() || record.answer.trim().is_empty() {
                tracing::warn!(index = raw_index, "skipping knowledge record with empty question or answer");
                continue;
            }
            kept.push((raw_index, record));
        }

        if kept.is_empty() {
            return Err(Error::KnowledgeBase("knowledge base has no usable records".to_string()));
        }

        let normalized: Vec<String> = kept
            .iter()
            .map(|(_, r)| normalizer.normalize(&r.question).text)
            .collect();

        let mut vectors: Vec<Option<Vec<f32>>> = kept
            .iter()
            .map(|(raw_index, _)| {
                precomputed
                    .as_ref()
                    .and_then(|p| p.vectors.get(&raw_index.to_string()).cloned())
            })
            .collect();

        let missing: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| normalized[i].clone()).collect();
            tracing::info!(
                count = texts.len(),
                model = %embedder.model_id(),
                "embedding knowledge base questions"
            );
            let computed = embedder.embed_batch(&texts).await?;
            if computed.len() != texts.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} questions",
                    computed.len(),
                    texts.len()
                )));
            }
            for (slot, vector) in missing.into_iter().zip(computed) {
                vectors[slot] = Some(vector);
            }
        }

        let entries = kept
            .into_iter()
            .zip(normalized)
            .zip(vectors)
            .enumerate()
            .map(|(index, (((_, record), normalized_question), vector))| KnowledgeEntry {
                index,
                question: record.question,
                normalized_question,
                answer: record.answer,
                tags: record.tags,
                embedding: vector.unwrap_or_default(),
            })
            .collect();

        Self::from_entries(entries, embedder.model_id())
    }

    /// Assemble a knowledge base from already-embedded entries
    ///
    /// Entry indices are reassigned to insertion order.
    ///
    /// # Errors
    ///
    /// Returns error if there are no entries or vector lengths differ
    pub fn from_entries(mut entries: Vec<KnowledgeEntry>, model_id: &str) -> Result<Self> {
        let Some(first) = entries.first() else {
            return Err(Error::KnowledgeBase("knowledge base has no entries".to_string()));
        };

        let dimensions = first.embedding.len();
        if dimensions == 0 {
            return Err(Error::KnowledgeBase("knowledge embeddings are empty".to_string()));
        }

        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.embedding.len() != dimensions {
                return Err(Error::KnowledgeBase(format!(
                    "entry {index} has {} dimensions, expected {dimensions}",
                    entry.embedding.len()
                )));
            }
            entry.index = index;
        }

        let centroid = mean_vector(entries.iter().map(|e| e.embedding.as_slice()));

        tracing::info!(entries = entries.len(), dimensions, model = model_id, "knowledge base ready");

        Ok(Self {
            entries,
            centroid,
            model_id: model_id.to_string(),
        })
    }

    /// Entries in insertion order
    #[must_use]
    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    /// Entry at an insertion index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&KnowledgeEntry> {
        self.entries.get(index)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the knowledge base is empty (never true once built)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mean of all entry embeddings, the in-domain centroid
    #[must_use]
    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    /// Embedding model the entries were embedded with
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Length of every entry embedding
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.centroid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CorrectionPolicy, Lexicon};
    use crate::providers::HashingEmbedder;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            Lexicon::new(vec![("espresso", vec!["expresso"])]).unwrap(),
            CorrectionPolicy::default(),
        )
    }

    #[test]
    fn test_parse_bare_records() {
        let artifact = KnowledgeArtifact::from_json(
            r#"[{"question": "What is a latte?", "answer": "Espresso with steamed milk."}]"#,
        )
        .unwrap();
        assert_eq!(artifact.entries.len(), 1);
        assert!(artifact.embeddings.is_none());
    }

    #[test]
    fn test_parse_full_artifact() {
        let artifact = KnowledgeArtifact::from_json(
            r#"{
                "entries": [{"question": "Q", "answer": "A", "tags": ["milk"]}],
                "embeddings": {"model": "hashing-4", "vectors": {"0": [1.0, 0.0, 0.0, 0.0]}}
            }"#,
        )
        .unwrap();
        assert_eq!(artifact.entries[0].tags, vec!["milk"]);
        assert_eq!(artifact.embeddings.unwrap().model, "hashing-4");
    }

    #[test]
    fn test_parse_invalid_artifact() {
        assert!(KnowledgeArtifact::from_json(r#"{"nope": 1}"#).is_err());
    }

    #[test]
    fn test_embedded_artifact_parses() {
        let artifact = KnowledgeArtifact::embedded().unwrap();
        assert!(!artifact.entries.is_empty());
    }

    #[tokio::test]
    async fn test_build_skips_empty_records_and_normalizes() {
        let artifact = KnowledgeArtifact {
            entries: vec![
                KnowledgeRecord {
                    question: "How do I make an Expresso?".to_string(),
                    answer: "Pack and pull.".to_string(),
                    tags: vec![],
                },
                KnowledgeRecord {
                    question: String::new(),
                    answer: "orphan".to_string(),
                    tags: vec![],
                },
                KnowledgeRecord {
                    question: "What is crema?".to_string(),
                    answer: "   ".to_string(),
                    tags: vec![],
                },
            ],
            embeddings: None,
        };

        let kb = KnowledgeBase::build(artifact, &normalizer(), &HashingEmbedder::new(32))
            .await
            .unwrap();

        assert_eq!(kb.len(), 1);
        assert_eq!(kb.entries()[0].normalized_question, "how do i make an espresso?");
        assert_eq!(kb.dimensions(), 32);
        assert_eq!(kb.model_id(), "hashing-32");
    }

    #[tokio::test]
    async fn test_build_rejects_all_empty() {
        let artifact = KnowledgeArtifact {
            entries: vec![KnowledgeRecord::default()],
            embeddings: None,
        };
        let result = KnowledgeBase::build(artifact, &normalizer(), &HashingEmbedder::new(8)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_hydrates_matching_precomputed_vectors() {
        let mut vectors = HashMap::new();
        // Index refers to the raw record position, including skipped records
        vectors.insert("1".to_string(), vec![0.0, 0.0, 0.0, 1.0]);

        let artifact = KnowledgeArtifact {
            entries: vec![
                KnowledgeRecord::default(),
                KnowledgeRecord {
                    question: "Q".to_string(),
                    answer: "A".to_string(),
                    tags: vec![],
                },
            ],
            embeddings: Some(PrecomputedEmbeddings {
                model: "hashing-4".to_string(),
                vectors,
            }),
        };

        let kb = KnowledgeBase::build(artifact, &normalizer(), &HashingEmbedder::new(4))
            .await
            .unwrap();
        assert_eq!(kb.entries()[0].embedding, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(kb.entries()[0].index, 0);
    }

    #[tokio::test]
    async fn test_build_ignores_foreign_model_vectors() {
        let mut vectors = HashMap::new();
        vectors.insert("0".to_string(), vec![9.0]);

        let artifact = KnowledgeArtifact {
            entries: vec![KnowledgeRecord {
                question: "espresso".to_string(),
                answer: "A".to_string(),
                tags: vec![],
            }],
            embeddings: Some(PrecomputedEmbeddings {
                model: "text-embedding-3-small".to_string(),
                vectors,
            }),
        };

        let embedder = HashingEmbedder::new(8);
        let kb = KnowledgeBase::build(artifact, &normalizer(), &embedder)
            .await
            .unwrap();
        assert_eq!(kb.entries()[0].embedding, embedder.embed_sync("espresso"));
    }

    #[test]
    fn test_from_entries_rejects_dimension_mismatch() {
        let entry = |embedding: Vec<f32>| KnowledgeEntry {
            index: 0,
            question: "q".to_string(),
            normalized_question: "q".to_string(),
            answer: "a".to_string(),
            tags: vec![],
            embedding,
        };
        let result = KnowledgeBase::from_entries(vec![entry(vec![1.0, 0.0]), entry(vec![1.0])], "m");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_entries_centroid_and_indices() {
        let entry = |embedding: Vec<f32>| KnowledgeEntry {
            index: 7,
            question: "q".to_string(),
            normalized_question: "q".to_string(),
            answer: "a".to_string(),
            tags: vec![],
            embedding,
        };
        let kb = KnowledgeBase::from_entries(vec![entry(vec![1.0, 0.0]), entry(vec![0.0, 1.0])], "m")
            .unwrap();
        assert_eq!(kb.centroid(), &[0.5, 0.5]);
        assert_eq!(kb.get(1).unwrap().index, 1);
    }
}
