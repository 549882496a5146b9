//! Similarity index for embedding lookups.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{SimilarityResult, find_top_k, normalize};

/// An entry in the similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique identifier.
    pub id: String,

    /// The embedding vector (normalized unless disabled).
    pub embedding: Embedding,
}

/// A similarity index for vector lookups.
///
/// Entries are kept in insertion order, so results with equal cosine
/// similarity come back in the order they were added. Re-adding an id
/// replaces its vector without moving it.
pub struct SimilarityIndex {
    /// Stored entries.
    entries: IndexMap<String, IndexEntry>,

    /// Expected dimension of embeddings.
    dimension: usize,

    /// Whether embeddings should be normalized.
    normalize_embeddings: bool,
}

impl SimilarityIndex {
    /// Create a new similarity index.
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            dimension,
            normalize_embeddings: true,
        }
    }

    /// Disable embedding normalization.
    pub fn without_normalization(mut self) -> Self {
        self.normalize_embeddings = false;
        self
    }

    /// Expected dimension of stored vectors.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add an embedding to the index.
    pub fn add(&mut self, id: impl Into<String>, mut embedding: Embedding) -> Result<()> {
        let id = id.into();

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        if self.normalize_embeddings {
            normalize(&mut embedding);
        }

        debug!("Added embedding to index: {id}");
        self.entries.insert(id.clone(), IndexEntry { id, embedding });

        Ok(())
    }

    /// Remove an embedding from the index.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        self.entries.shift_remove(id)
    }

    /// Check if an ID exists in the index.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Search for similar embeddings.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<SimilarityResult>> {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        if self.normalize_embeddings {
            normalize(&mut query);
        }

        let candidates = self
            .entries
            .values()
            .map(|e| (e.id.as_str(), e.embedding.as_slice()));

        find_top_k(&query, candidates, k, min_score)
    }
}
