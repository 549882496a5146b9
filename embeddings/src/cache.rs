//! Embedding cache for efficient retrieval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of the model and the text that was embedded.
    pub text_hash: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// When the entry was created (seconds since the epoch).
    pub created_at: u64,
}

/// Cache for embeddings to avoid redundant provider calls.
///
/// Entries are evicted oldest-inserted first once `max_entries` is reached.
pub struct EmbeddingCache {
    /// In-memory cache, in insertion order.
    cache: Arc<RwLock<IndexMap<String, CacheEntry>>>,

    /// Path for persistent cache storage.
    cache_path: Option<PathBuf>,

    /// Maximum cache size.
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a new in-memory cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(IndexMap::new())),
            cache_path: None,
            max_entries: max_entries.max(1),
        }
    }

    /// Create a cache with persistent storage.
    pub async fn with_persistence(path: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        let cache = Self {
            cache_path: Some(path.as_ref().to_path_buf()),
            ..Self::new(max_entries)
        };

        cache.load().await?;

        Ok(cache)
    }

    /// Compute a stable hash for cache lookup.
    fn hash_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        let cache = self.cache.read().await;
        cache.get(&key).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) -> Result<()> {
        self.put_many(vec![(text.to_string(), embedding)], model)
            .await
    }

    /// Put several embeddings for one model, persisting once.
    pub async fn put_many(&self, entries: Vec<(String, Embedding)>, model: &str) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        {
            let mut cache = self.cache.write().await;

            for (text, embedding) in entries {
                let key = Self::hash_key(&text, model);
                while cache.len() >= self.max_entries && !cache.contains_key(&key) {
                    cache.shift_remove_index(0);
                }
                cache.insert(
                    key.clone(),
                    CacheEntry {
                        text_hash: key,
                        embedding,
                        model: model.to_string(),
                        created_at,
                    },
                );
            }
            debug!("Cached embeddings (model: {model}), {} entries held", cache.len());
        }

        if self.cache_path.is_some() {
            self.save().await?;
        }

        Ok(())
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache holds no embeddings.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Save cache to disk.
    async fn save(&self) -> Result<()> {
        if let Some(ref path) = self.cache_path {
            let content = {
                let cache = self.cache.read().await;
                let entries: Vec<&CacheEntry> = cache.values().collect();
                serde_json::to_string(&entries)?
            };

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }

            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, content).await?;
            fs::rename(&temp_path, path).await?;
            debug!("Saved embedding cache to {}", path.display());
        }
        Ok(())
    }

    /// Load cache from disk.
    async fn load(&self) -> Result<()> {
        if let Some(ref path) = self.cache_path {
            if !fs::try_exists(path).await? {
                return Ok(());
            }

            let content = fs::read_to_string(path).await?;
            let entries: Vec<CacheEntry> = serde_json::from_str(&content)?;

            let mut cache = self.cache.write().await;
            for entry in entries {
                cache.insert(entry.text_hash.clone(), entry);
            }
            while cache.len() > self.max_entries {
                cache.shift_remove_index(0);
            }

            info!("Loaded {} cache entries from disk", cache.len());
        }
        Ok(())
    }
}

/// A provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn default_model(&self) -> &str {
        self.provider.default_model()
    }

    fn default_dimension(&self) -> usize {
        self.provider.default_dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            debug!("Cache hit for embedding");
            return Ok(EmbeddingResponse {
                dimension: embedding.len(),
                embedding,
                model,
                tokens_used: None,
            });
        }

        let text = request.text.clone();
        let response = self.provider.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await?;

        Ok(response)
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let default_model = self.provider.default_model().to_string();
        let model_of =
            |request: &EmbeddingRequest| request.model.clone().unwrap_or_else(|| default_model.clone());

        let mut results: Vec<Option<EmbeddingResponse>> = Vec::with_capacity(requests.len());
        let mut misses: Vec<(usize, EmbeddingRequest)> = Vec::new();

        for (slot, request) in requests.into_iter().enumerate() {
            let model = model_of(&request);
            match self.cache.get(&request.text, &model).await {
                Some(embedding) => results.push(Some(EmbeddingResponse {
                    dimension: embedding.len(),
                    embedding,
                    model,
                    tokens_used: None,
                })),
                None => {
                    results.push(None);
                    misses.push((slot, request));
                }
            }
        }

        debug!(
            "Embedding batch: {} cached, {} to fetch",
            results.len() - misses.len(),
            misses.len()
        );

        // One inner batch per model keeps each upstream call homogeneous.
        let mut by_model: IndexMap<String, Vec<(usize, EmbeddingRequest)>> = IndexMap::new();
        for (slot, request) in misses {
            by_model.entry(model_of(&request)).or_default().push((slot, request));
        }

        for (model, group) in by_model {
            let (slots, batch): (Vec<usize>, Vec<EmbeddingRequest>) = group.into_iter().unzip();
            let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let responses = self.provider.embed_batch(batch).await?;

            let fresh = texts
                .into_iter()
                .zip(responses.iter().map(|r| r.embedding.clone()))
                .collect();
            self.cache.put_many(fresh, &model).await?;

            for (slot, response) in slots.into_iter().zip(responses) {
                results[slot] = Some(response);
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.ok_or_else(|| {
                    EmbeddingError::InvalidResponse("provider returned too few embeddings".to_string())
                })
            })
            .collect()
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}
