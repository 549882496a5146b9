//! Error types for the document index.

use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur in the document index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] adaptive_embeddings::EmbeddingError),

    /// Vector search requested but no document carries an embedding.
    #[error("index has no embeddings")]
    NoEmbeddings,

    /// Invalid document.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
