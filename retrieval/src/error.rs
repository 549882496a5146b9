//! Error types for the adaptive retrieval core.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the adaptive retrieval core.
///
/// Only [`RetrievalError::InvalidArgument`] and [`RetrievalError::NoCandidates`]
/// ever reach the caller of a request; strategy-level failures are absorbed
/// by the controller.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Bad caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The index or embedding provider failed or timed out.
    #[error("retrieval unavailable for strategy {strategy}: {reason}")]
    RetrievalUnavailable { strategy: String, reason: String },

    /// The rewriter could not produce a query distinct from prior ones.
    #[error("no distinct query rewrite available")]
    NoRewriteAvailable,

    /// No strategy produced any candidate for the request.
    #[error("no candidates: no strategy produced a result after {attempts} attempts")]
    NoCandidates { attempts: usize },

    /// Strategy id not declared at startup.
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Learning store persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file parse error.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Whether this error terminates a request rather than a single attempt.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::NoCandidates { .. }
        )
    }
}
