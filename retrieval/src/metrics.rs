//! Per-attempt metrics.
//!
//! Every strategy execution of every request is appended to
//! `attempts.jsonl`, including unavailable attempts and requests that end
//! without candidates. The log is write-only from the controller's point
//! of view and never feeds back into strategy weights.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::attempt::{Attempt, AttemptOutcome};
use crate::error::{Result, RetrievalError};
use crate::query::{Query, QueryHash};

const METRICS_FILE: &str = "attempts.jsonl";

/// One line of the attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetric {
    pub request_id: Uuid,
    /// The caller's original query.
    pub query: String,
    pub query_hash: QueryHash,
    /// Query text actually executed, after rewrites.
    pub executed_query: String,
    pub strategy_id: String,
    pub sequence: usize,
    pub strategy_attempt: usize,
    /// Absent when retrieval was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub candidates: usize,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl AttemptMetric {
    pub fn from_attempt(request_id: Uuid, original: &Query, attempt: &Attempt) -> Self {
        Self {
            request_id,
            query: original.text().to_string(),
            query_hash: original.hash(),
            executed_query: attempt.query.text().to_string(),
            strategy_id: attempt.strategy_id.clone(),
            sequence: attempt.sequence,
            strategy_attempt: attempt.strategy_attempt,
            score: attempt.aggregate_score(),
            candidates: attempt.candidates.len(),
            outcome: attempt.outcome,
            elapsed_ms: attempt.elapsed_ms,
            started_at: attempt.started_at,
        }
    }
}

/// Append-only log of [`AttemptMetric`]s.
pub struct AttemptLog {
    path: Option<PathBuf>,
    /// Entries of an in-memory log; also serializes file appends.
    memory: Mutex<Vec<AttemptMetric>>,
}

impl AttemptLog {
    /// Open the log in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", dir.display())))?;
        Ok(Self {
            path: Some(dir.join(METRICS_FILE)),
            memory: Mutex::new(Vec::new()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            memory: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append the attempts of one request.
    pub async fn append(&self, metrics: &[AttemptMetric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        let mut memory = self.memory.lock().await;
        let Some(path) = &self.path else {
            memory.extend_from_slice(metrics);
            return Ok(());
        };

        let mut buf = String::new();
        for metric in metrics {
            buf.push_str(&serde_json::to_string(metric)?);
            buf.push('\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;
        file.flush().await?;

        debug!("Logged {} attempts to {}", metrics.len(), path.display());
        Ok(())
    }

    /// Every logged attempt, in append order.
    pub async fn read_all(&self) -> Result<Vec<AttemptMetric>> {
        let memory = self.memory.lock().await;
        let Some(path) = &self.path else {
            return Ok(memory.clone());
        };
        if !fs::try_exists(path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;

        let mut metrics = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AttemptMetric>(line) {
                Ok(metric) => metrics.push(metric),
                Err(e) => warn!(
                    "Skipping malformed attempt metric at {}:{}: {e}",
                    path.display(),
                    line_no + 1
                ),
            }
        }
        Ok(metrics)
    }
}
