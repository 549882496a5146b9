//! Wiring of corpus, index, embedder and controller for one request.

use std::sync::Arc;

use adaptive_embeddings::{
    CachedProvider, EmbeddingCache, EmbeddingProvider, HashingProvider, OpenAIProvider,
};
use adaptive_index::{CorpusStore, MemoryIndex};
use adaptive_retrieval::{AdaptiveConfig, AdaptiveController};
use anyhow::{Context, Result, bail};
use tracing::info;

use crate::{Cli, EmbedderKind};

/// Embeddings kept by the persistent cache of the remote provider.
const EMBEDDING_CACHE_ENTRIES: usize = 10_000;

pub async fn run(cli: Cli) -> Result<()> {
    let query = cli.query.join(" ");
    let config = load_config(&cli).await?;
    let state_dir = config.learning.state_dir();

    let embedder: Arc<dyn EmbeddingProvider> = match cli.embedder {
        EmbedderKind::Hashing => Arc::new(HashingProvider::new()),
        EmbedderKind::Openai => {
            let provider = OpenAIProvider::new();
            if !provider.is_available() {
                bail!("OPENAI_API_KEY must be set to use the openai embedder");
            }
            let cache = EmbeddingCache::with_persistence(
                state_dir.join("embedding-cache.json"),
                EMBEDDING_CACHE_ENTRIES,
            )
            .await
            .context("failed to open embedding cache")?;
            Arc::new(CachedProvider::new(provider, cache))
        }
    };

    let mut documents = Vec::new();
    let mut corpus_ids = Vec::new();
    if let Some(path) = &cli.corpus {
        let corpus = CorpusStore::new(path)
            .load()
            .await
            .with_context(|| format!("failed to load corpus {}", path.display()))?;
        corpus_ids.extend(corpus.iter().map(|d| d.id.clone()));
        documents.extend(corpus);
    }
    if let Some(dir) = &cli.ingest {
        let ingested = CorpusStore::load_directory(dir)
            .await
            .with_context(|| format!("failed to ingest {}", dir.display()))?;
        documents.extend(ingested);
    }

    let mut index = MemoryIndex::from_documents(documents)?;
    let embedded = index
        .ensure_embeddings(embedder.as_ref())
        .await
        .context("failed to embed corpus")?;
    info!(
        "Indexed {} documents ({embedded} newly embedded with {})",
        index.len(),
        embedder.name()
    );

    if let Some(path) = cli.corpus.as_ref().filter(|_| cli.save_embeddings && embedded > 0) {
        CorpusStore::new(path)
            .save(corpus_ids.iter().filter_map(|id| index.get(id)))
            .await
            .with_context(|| format!("failed to save corpus {}", path.display()))?;
        info!("Saved embeddings to {}", path.display());
    }

    let controller = AdaptiveController::open(&config, Arc::new(index), embedder)
        .await
        .with_context(|| format!("failed to open learning state in {}", state_dir.display()))?;

    let result = controller.retrieve(&query).await;
    controller
        .learning()
        .flush()
        .await
        .context("failed to save strategy weights")?;
    let report = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<AdaptiveConfig> {
    let mut config = match &cli.config {
        Some(path) => AdaptiveConfig::load(path)
            .await
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AdaptiveConfig::default(),
    };

    if let Some(dir) = &cli.state_dir {
        config.learning.state_dir = Some(dir.clone());
    }
    if let Some(threshold) = cli.threshold {
        config.controller.threshold = threshold;
    }
    if let Some(top_k) = cli.top_k {
        config.controller.top_k = top_k;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.controller.max_attempts = max_attempts;
    }

    config.validate()?;
    Ok(config)
}
