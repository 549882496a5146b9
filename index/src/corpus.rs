//! Corpus persistence.
//!
//! A corpus is a JSON array of [`Document`]s. Saving goes through a temp
//! file and a rename so a crash never leaves a half-written corpus behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::Document;
use crate::error::{IndexError, Result};

/// File extensions picked up by [`CorpusStore::load_directory`].
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "log"];

/// Reads and writes a JSON corpus file.
pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    /// Create a store for the given corpus file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the corpus file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all documents. A missing file is an empty corpus.
    pub async fn load(&self) -> Result<Vec<Document>> {
        if !fs::try_exists(&self.path).await? {
            debug!("No corpus at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| IndexError::Storage(format!("{}: {e}", self.path.display())))?;
        let documents: Vec<Document> = serde_json::from_str(&content)?;

        info!(
            "Loaded {} documents from {}",
            documents.len(),
            self.path.display()
        );
        Ok(documents)
    }

    /// Save documents, replacing the corpus atomically.
    pub async fn save<'a>(&self, documents: impl IntoIterator<Item = &'a Document>) -> Result<()> {
        let documents: Vec<&Document> = documents.into_iter().collect();
        let content = serde_json::to_string_pretty(&documents)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexError::Storage(format!("{}: {e}", parent.display())))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| IndexError::Storage(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| IndexError::Storage(format!("{}: {e}", self.path.display())))?;

        debug!(
            "Saved {} documents to {}",
            documents.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read every text file under `dir` into a document.
    ///
    /// The id is the path relative to `dir`. Files are visited in file name
    /// order, so the resulting corpus is the same on every run.
    pub async fn load_directory(dir: impl AsRef<Path>) -> Result<Vec<Document>> {
        let dir = dir.as_ref();
        let mut documents = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();

            if !entry.file_type().is_file() || !has_text_extension(path) {
                continue;
            }

            let content = match fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {e}", path.display());
                    continue;
                }
            };

            let id = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            documents.push(Document::new(id, content).with_metadata(serde_json::json!({
                "path": path.display().to_string(),
            })));
        }

        info!("Ingested {} documents from {}", documents.len(), dir.display());
        Ok(documents)
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
