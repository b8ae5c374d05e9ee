//! Curated coffee knowledge base and semantic retrieval
//!
//! - **base**: load the FAQ artifact and embed every question once at startup
//! - **retriever**: brute-force cosine similarity search with a fixed
//!   acceptance threshold

mod base;
mod retriever;

pub use base::{KnowledgeArtifact, KnowledgeBase, KnowledgeEntry, KnowledgeRecord, PrecomputedEmbeddings};
pub use retriever::{RetrievalResult, Retriever, cosine_similarity, mean_vector};
