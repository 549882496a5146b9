//! The index provider contract consumed by the retrieval core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A vector similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    /// Document identifier.
    pub id: String,

    /// Document content.
    pub content: String,

    /// Document metadata.
    pub metadata: Option<serde_json::Value>,

    /// Cosine similarity to the query vector.
    pub similarity: f32,
}

/// A keyword search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordHit {
    /// Document identifier.
    pub id: String,

    /// Document content.
    pub content: String,

    /// Document metadata.
    pub metadata: Option<serde_json::Value>,

    /// Lexical (BM25) score, unbounded above.
    pub score: f32,
}

/// A store that answers vector and keyword queries.
///
/// Both capabilities return hits ranked best first, at most `top_k` of them.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    /// Name used in logs and traces.
    fn name(&self) -> &str;

    /// Rank documents by similarity to `embedding`.
    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Rank documents by lexical match against `text`.
    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<KeywordHit>>;
}
