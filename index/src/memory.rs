//! In-memory document index.

use adaptive_embeddings::{EmbeddingProvider, EmbeddingRequest, SimilarityIndex};
use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{IndexError, Result};
use crate::keyword::KeywordIndex;
use crate::provider::{IndexProvider, KeywordHit, VectorHit};

/// Number of texts sent per embedding batch.
const EMBED_BATCH_SIZE: usize = 64;

/// An in-memory index serving both vector and keyword search.
///
/// The vector dimension is fixed by the first embedded document.
#[derive(Default)]
pub struct MemoryIndex {
    /// Documents in insertion order.
    documents: IndexMap<String, Document>,

    /// Vector index, created with the first embedding.
    vectors: Option<SimilarityIndex>,

    /// Keyword index.
    keywords: KeywordIndex,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a set of documents.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Result<Self> {
        let mut index = Self::new();
        for document in documents {
            index.insert(document)?;
        }
        Ok(index)
    }

    /// Insert or replace a document.
    pub fn insert(&mut self, document: Document) -> Result<()> {
        if document.id.trim().is_empty() {
            return Err(IndexError::InvalidDocument(
                "document id must not be empty".to_string(),
            ));
        }

        self.keywords.add(&document.id, &document.content);

        match document.embedding.as_ref().filter(|e| !e.is_empty()) {
            Some(embedding) => {
                let vectors = self
                    .vectors
                    .get_or_insert_with(|| SimilarityIndex::new(embedding.len()));
                vectors.add(document.id.clone(), embedding.clone())?;
            }
            None => {
                if let Some(vectors) = self.vectors.as_mut() {
                    vectors.remove(&document.id);
                }
            }
        }

        debug!("Indexed document: {}", document.id);
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    /// Get a document by id.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// All documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of documents searchable by vector.
    pub fn embedded_count(&self) -> usize {
        self.vectors.as_ref().map_or(0, SimilarityIndex::len)
    }

    /// Compute embeddings for every document that lacks one.
    ///
    /// Vectors produced by a different model (or, when untagged, of a
    /// different length) are discarded and recomputed with `provider`.
    /// Blank documents are skipped. Returns the number of documents embedded.
    pub async fn ensure_embeddings(&mut self, provider: &dyn EmbeddingProvider) -> Result<usize> {
        let model = provider.default_model().to_string();
        self.drop_stale_embeddings(&model, provider.default_dimension())?;

        let missing: Vec<(String, String)> = self
            .documents
            .values()
            .filter(|d| d.needs_embedding() && !d.content.trim().is_empty())
            .map(|d| (d.id.clone(), d.content.clone()))
            .collect();

        let mut count = 0;
        for chunk in missing.chunks(EMBED_BATCH_SIZE) {
            let requests = chunk
                .iter()
                .map(|(_, text)| EmbeddingRequest::new(text.clone()))
                .collect();
            let responses = provider.embed_batch(requests).await?;

            for ((id, _), response) in chunk.iter().zip(responses) {
                if let Some(mut document) = self.documents.get(id).cloned() {
                    document.embedding = Some(response.embedding);
                    document.embedding_model = Some(model.clone());
                    self.insert(document)?;
                    count += 1;
                }
            }
        }

        if count > 0 {
            info!("Added embeddings to {count} documents");
        }
        Ok(count)
    }

    /// Clear vectors that do not belong to `model` and rebuild the vector
    /// index from the ones that remain.
    fn drop_stale_embeddings(&mut self, model: &str, dimension: usize) -> Result<()> {
        let mut stale = 0;
        for document in self.documents.values_mut() {
            if document.has_stale_embedding(model, dimension) {
                document.clear_embedding();
                stale += 1;
            }
        }
        if stale == 0 {
            return Ok(());
        }

        warn!("Discarding {stale} embeddings not produced by {model}");
        self.vectors = None;
        for document in self.documents.values() {
            if let Some(embedding) = document.embedding.as_ref().filter(|e| !e.is_empty()) {
                let vectors = self
                    .vectors
                    .get_or_insert_with(|| SimilarityIndex::new(embedding.len()));
                vectors.add(document.id.clone(), embedding.clone())?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexProvider for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let vectors = self
            .vectors
            .as_ref()
            .filter(|v| !v.is_empty())
            .ok_or(IndexError::NoEmbeddings)?;

        let results = vectors.search(embedding, top_k, -1.0)?;

        Ok(results
            .into_iter()
            .filter_map(|result| {
                self.documents.get(&result.id).map(|d| VectorHit {
                    id: d.id.clone(),
                    content: d.content.clone(),
                    metadata: d.metadata.clone(),
                    similarity: result.score,
                })
            })
            .collect())
    }

    async fn keyword_search(&self, text: &str, top_k: usize) -> Result<Vec<KeywordHit>> {
        Ok(self
            .keywords
            .search(text, top_k)
            .into_iter()
            .filter_map(|(id, score)| {
                self.documents.get(&id).map(|d| KeywordHit {
                    id: d.id.clone(),
                    content: d.content.clone(),
                    metadata: d.metadata.clone(),
                    score,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_embeddings::HashingProvider;
    use pretty_assertions::assert_eq;

    fn sample() -> MemoryIndex {
        MemoryIndex::from_documents([
            Document::new("pool", "connection pool exhausted under heavy load"),
            Document::new("disk", "disk full on primary node"),
            Document::new("blank", "   "),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_keyword_search_returns_content() {
        let index = sample();
        let hits = index.keyword_search("pool exhausted", 5).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "pool");
        assert_eq!(hits[0].content, "connection pool exhausted under heavy load");
    }

    #[tokio::test]
    async fn test_vector_search_without_embeddings_fails() {
        let index = sample();
        let err = index.vector_search(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(err, IndexError::NoEmbeddings));
    }

    #[tokio::test]
    async fn test_ensure_embeddings_skips_blank_documents() {
        let mut index = sample();
        let provider = HashingProvider::new();

        let added = index.ensure_embeddings(&provider).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(index.embedded_count(), 2);

        let again = index.ensure_embeddings(&provider).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_vector_search_after_embedding() {
        let mut index = sample();
        let provider = HashingProvider::new();
        index.ensure_embeddings(&provider).await.unwrap();

        let query = provider
            .embed(EmbeddingRequest::new("connection pool exhausted"))
            .await
            .unwrap();
        let hits = index.vector_search(&query.embedding, 1).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "pool");
    }

    #[tokio::test]
    async fn test_ensure_embeddings_replaces_foreign_model_vectors() {
        let mut index = MemoryIndex::from_documents([
            Document::new("a", "connection pool exhausted")
                .with_embedding(vec![0.1; 1536], "text-embedding-3-small"),
            Document::new("b", "disk full on primary node"),
        ])
        .unwrap();
        let provider = HashingProvider::new();

        let added = index.ensure_embeddings(&provider).await.unwrap();

        assert_eq!(added, 2);
        assert_eq!(index.embedded_count(), 2);
        for document in index.documents() {
            assert_eq!(
                document.embedding_model.as_deref(),
                Some(provider.default_model())
            );
            assert_eq!(
                document.embedding.as_ref().map(Vec::len),
                Some(provider.default_dimension())
            );
        }

        let query = provider
            .embed(EmbeddingRequest::new("connection pool exhausted"))
            .await
            .unwrap();
        let hits = index.vector_search(&query.embedding, 1).await.unwrap();
        assert_eq!(hits[0].id, "a");

        assert_eq!(index.ensure_embeddings(&provider).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_embeddings_keeps_matching_vectors() {
        let provider = HashingProvider::new();
        let existing = provider
            .embed(EmbeddingRequest::new("connection pool exhausted"))
            .await
            .unwrap();
        let mut index = MemoryIndex::from_documents([
            Document::new("a", "connection pool exhausted")
                .with_embedding(existing.embedding.clone(), provider.default_model()),
            Document::new("b", "disk full on primary node"),
        ])
        .unwrap();

        assert_eq!(index.ensure_embeddings(&provider).await.unwrap(), 1);
        assert_eq!(
            index.get("a").and_then(|d| d.embedding.clone()),
            Some(existing.embedding)
        );
    }

    #[test]
    fn test_replacing_document_drops_stale_vector() {
        let mut index = MemoryIndex::new();
        index
            .insert(Document::new("a", "text").with_embedding(vec![1.0, 0.0], "m"))
            .unwrap();
        assert_eq!(index.embedded_count(), 1);

        index.insert(Document::new("a", "new text")).unwrap();
        assert_eq!(index.embedded_count(), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_rejects_empty_id() {
        let mut index = MemoryIndex::new();
        assert!(index.insert(Document::new(" ", "text")).is_err());
    }
}
