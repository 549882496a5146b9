//! Retrieved candidates and their native relevance signals.

use serde::{Deserialize, Serialize};

/// The relevance signal a strategy attached to a candidate.
///
/// Signals keep the native scale of the strategy that produced them;
/// the scorer is responsible for normalizing them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelevanceSignal {
    /// Cosine similarity in `[-1, 1]`.
    Similarity { value: f32 },

    /// Lexical (BM25) score, unbounded above.
    Lexical { value: f32 },

    /// Hybrid fusion of both signals. A side is absent when the candidate
    /// was not returned by that search.
    Hybrid {
        similarity: Option<f32>,
        lexical: Option<f32>,
        alpha: f32,
        fused: f32,
    },
}

impl RelevanceSignal {
    /// The raw value used to rank within one result list.
    pub fn raw(&self) -> f32 {
        match self {
            Self::Similarity { value } | Self::Lexical { value } => *value,
            Self::Hybrid { fused, .. } => *fused,
        }
    }
}

/// A retrieved item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Document identifier in the index.
    pub source_id: String,

    /// Document content.
    pub content: String,

    /// Document metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Native relevance signal.
    pub signal: RelevanceSignal,

    /// Position in the result list, best first, starting at zero.
    pub rank: usize,
}
