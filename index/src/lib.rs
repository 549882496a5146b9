//! # Document Index
//!
//! The two query capabilities the retrieval core depends on, behind the
//! [`IndexProvider`] trait:
//!
//! - **Vector search**: cosine similarity over document embeddings
//! - **Keyword search**: BM25 over an inverted index
//!
//! [`MemoryIndex`] implements both over an in-memory document set that can
//! be loaded from and saved to a JSON corpus, or ingested from a directory
//! of text files.

pub mod corpus;
pub mod document;
pub mod error;
pub mod keyword;
pub mod memory;
pub mod provider;
pub mod text;

pub use corpus::CorpusStore;
pub use document::Document;
pub use error::{IndexError, Result};
pub use keyword::KeywordIndex;
pub use memory::MemoryIndex;
pub use provider::{IndexProvider, KeywordHit, VectorHit};
