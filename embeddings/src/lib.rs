//! # Embeddings
//!
//! Embedding generation and vector similarity for adaptive retrieval.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors (`EmbeddingProvider`)
//! - **Offline Hashing Embedder**: Deterministic, network-free embeddings
//! - **Similarity Search**: Cosine similarity over an insertion-ordered index
//! - **Caching**: Persistent cache of computed embeddings
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► SimilarityIndex           │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  OpenAI / Hashing ◄── CachedProvider ──► EmbeddingCache        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod provider;
pub mod similarity;

pub use cache::{CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use index::SimilarityIndex;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use similarity::{SimilarityResult, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension used by the hashing embedder unless configured otherwise.
pub const DEFAULT_HASHING_DIMENSION: usize = 256;
