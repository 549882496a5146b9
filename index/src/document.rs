//! Documents stored in the index.

use adaptive_embeddings::Embedding;
use serde::{Deserialize, Serialize};

/// A retrievable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,

    /// Text searched by both keyword and vector search.
    pub content: String,

    /// Free-form metadata returned with hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Embedding of `content`, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,

    /// Model that produced `embedding`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl Document {
    /// Create a document without metadata or embedding.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: None,
            embedding: None,
            embedding_model: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach a precomputed embedding.
    pub fn with_embedding(mut self, embedding: Embedding, model: impl Into<String>) -> Self {
        self.embedding = Some(embedding);
        self.embedding_model = Some(model.into());
        self
    }

    /// Whether the document still needs an embedding.
    pub fn needs_embedding(&self) -> bool {
        self.embedding.as_ref().is_none_or(Vec::is_empty)
    }

    /// Whether the stored vector cannot be compared with vectors from
    /// `model`.
    ///
    /// A tagged vector is stale when its model differs. An untagged vector
    /// is stale when its length is not `dimension`.
    pub fn has_stale_embedding(&self, model: &str, dimension: usize) -> bool {
        let Some(embedding) = self.embedding.as_ref().filter(|e| !e.is_empty()) else {
            return false;
        };
        match &self.embedding_model {
            Some(tagged) => tagged != model,
            None => embedding.len() != dimension,
        }
    }

    /// Drop the embedding and its model tag.
    pub fn clear_embedding(&mut self) {
        self.embedding = None;
        self.embedding_model = None;
    }
}
