//! Strategy execution against the index and embedding providers.

use std::sync::Arc;
use std::time::Duration;

use adaptive_embeddings::{EmbeddingProvider, EmbeddingRequest};
use adaptive_index::{IndexProvider, KeywordHit, VectorHit};
use indexmap::IndexMap;
use tracing::debug;

use crate::candidate::{Candidate, RelevanceSignal};
use crate::error::{Result, RetrievalError};
use crate::query::Query;
use crate::strategy::{Strategy, StrategyKind};

/// Rank offset for reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

/// Runs one strategy for one query.
#[derive(Clone)]
pub struct RetrievalExecutor {
    index: Arc<dyn IndexProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    timeout: Option<Duration>,
}

impl RetrievalExecutor {
    pub fn new(index: Arc<dyn IndexProvider>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder,
            timeout: None,
        }
    }

    /// Bound each execution; an elapsed bound surfaces as unavailability.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retrieve up to `top_k` candidates, best first.
    ///
    /// Fails with [`RetrievalError::InvalidArgument`] for a zero `top_k` and
    /// with [`RetrievalError::RetrievalUnavailable`] when a provider fails or
    /// the timeout elapses.
    pub async fn execute(
        &self,
        strategy: &Strategy,
        query: &Query,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }

        let search = self.search(strategy, query, top_k);
        let candidates = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, search).await.map_err(|_| {
                unavailable(
                    strategy,
                    format!("timed out after {}ms", timeout.as_millis()),
                )
            })??,
            None => search.await?,
        };

        debug!(
            "Strategy {} returned {} candidates for '{}'",
            strategy.id(),
            candidates.len(),
            query.text()
        );
        Ok(candidates)
    }

    async fn search(
        &self,
        strategy: &Strategy,
        query: &Query,
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        match strategy.kind() {
            StrategyKind::Vector => {
                let hits = self.vector_hits(strategy, query, top_k).await?;
                Ok(hits
                    .into_iter()
                    .enumerate()
                    .map(|(rank, hit)| Candidate {
                        source_id: hit.id,
                        content: hit.content,
                        metadata: hit.metadata,
                        signal: RelevanceSignal::Similarity {
                            value: hit.similarity,
                        },
                        rank,
                    })
                    .collect())
            }
            StrategyKind::Keyword => {
                let hits = self.keyword_hits(strategy, query, top_k).await?;
                Ok(hits
                    .into_iter()
                    .enumerate()
                    .map(|(rank, hit)| Candidate {
                        source_id: hit.id,
                        content: hit.content,
                        metadata: hit.metadata,
                        signal: RelevanceSignal::Lexical { value: hit.score },
                        rank,
                    })
                    .collect())
            }
            StrategyKind::Hybrid { alpha } => {
                let (vector, keyword) = tokio::join!(
                    self.vector_hits(strategy, query, top_k),
                    self.keyword_hits(strategy, query, top_k)
                );
                Ok(fuse(vector?, keyword?, alpha, top_k))
            }
        }
    }

    async fn vector_hits(
        &self,
        strategy: &Strategy,
        query: &Query,
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let embedding = self
            .embedder
            .embed(EmbeddingRequest::new(query.text()))
            .await
            .map_err(|e| unavailable(strategy, format!("{}: {e}", self.embedder.name())))?;
        self.index
            .vector_search(&embedding.embedding, top_k)
            .await
            .map_err(|e| unavailable(strategy, format!("{}: {e}", self.index.name())))
    }

    async fn keyword_hits(
        &self,
        strategy: &Strategy,
        query: &Query,
        top_k: usize,
    ) -> Result<Vec<KeywordHit>> {
        self.index
            .keyword_search(query.text(), top_k)
            .await
            .map_err(|e| unavailable(strategy, format!("{}: {e}", self.index.name())))
    }
}

fn unavailable(strategy: &Strategy, reason: String) -> RetrievalError {
    RetrievalError::RetrievalUnavailable {
        strategy: strategy.id().to_string(),
        reason,
    }
}

/// Merge vector and keyword hits with alpha-weighted reciprocal rank fusion.
///
/// Each list contributes `weight / (RRF_K + rank)` with 1-based ranks.
/// Equal fused scores keep merge order: vector hits first, then hits only
/// the keyword search found.
fn fuse(vector: Vec<VectorHit>, keyword: Vec<KeywordHit>, alpha: f32, top_k: usize) -> Vec<Candidate> {
    struct Fused {
        content: String,
        metadata: Option<serde_json::Value>,
        similarity: Option<f32>,
        lexical: Option<f32>,
        fused: f32,
    }

    let mut merged: IndexMap<String, Fused> = IndexMap::new();

    for (i, hit) in vector.into_iter().enumerate() {
        let contribution = alpha / (RRF_K + (i + 1) as f32);
        merged.entry(hit.id).or_insert(Fused {
            content: hit.content,
            metadata: hit.metadata,
            similarity: Some(hit.similarity),
            lexical: None,
            fused: contribution,
        });
    }

    for (i, hit) in keyword.into_iter().enumerate() {
        let contribution = (1.0 - alpha) / (RRF_K + (i + 1) as f32);
        let entry = merged.entry(hit.id).or_insert(Fused {
            content: hit.content,
            metadata: hit.metadata,
            similarity: None,
            lexical: None,
            fused: 0.0,
        });
        if entry.lexical.is_none() {
            entry.lexical = Some(hit.score);
            entry.fused += contribution;
        }
    }

    let mut fused: Vec<(String, Fused)> = merged.into_iter().collect();
    // Stable sort, descending
    fused.sort_by(|a, b| b.1.fused.total_cmp(&a.1.fused));
    fused.truncate(top_k);

    fused
        .into_iter()
        .enumerate()
        .map(|(rank, (id, f))| Candidate {
            source_id: id,
            content: f.content,
            metadata: f.metadata,
            signal: RelevanceSignal::Hybrid {
                similarity: f.similarity,
                lexical: f.lexical,
                alpha,
                fused: f.fused,
            },
            rank,
        })
        .collect()
}
