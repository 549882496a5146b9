//! Learned strategy weights.
//!
//! Every accepted or exhausted request reports one outcome per scored
//! strategy. Outcomes are appended to `outcomes.jsonl` and folded into
//! per-strategy weights with an exponential moving average:
//!
//! ```text
//! w = (1 - alpha) * w + alpha * score
//! ```
//!
//! The folded weights are snapshotted to `weights.json` together with the
//! sequence number of the last applied outcome. On open, outcomes newer than
//! the snapshot are replayed, so a lost or stale snapshot never loses
//! history. Updates are serialized behind a single write lock; a replay of
//! the log in sequence order always reproduces the live weights.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FlushPolicy, LearningConfig};
use crate::error::{Result, RetrievalError};
use crate::query::QueryHash;

const LOG_FILE: &str = "outcomes.jsonl";
const SNAPSHOT_FILE: &str = "weights.json";
const SNAPSHOT_VERSION: u32 = 1;

/// An outcome to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub strategy_id: String,
    pub score: f64,
    pub query_hash: Option<QueryHash>,
    pub request_id: Option<Uuid>,
}

impl Outcome {
    pub fn new(strategy_id: impl Into<String>, score: f64) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            score,
            query_hash: None,
            request_id: None,
        }
    }

    pub fn with_query_hash(mut self, hash: QueryHash) -> Self {
        self.query_hash = Some(hash);
        self
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// A recorded outcome, as stored in the outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Position in the log, starting at one.
    pub seq: u64,
    pub strategy_id: String,
    /// Final aggregate score of the strategy in its request.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_hash: Option<QueryHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

/// Current state of one strategy's weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeight {
    pub weight: f64,
    /// Outcomes folded into the weight.
    pub count: u64,
    /// Sequence number of the last folded outcome (0 if none).
    pub last_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WeightSnapshot {
    version: u32,
    applied_seq: u64,
    strategies: BTreeMap<String, StrategyWeight>,
}

#[derive(Debug)]
struct LearningState {
    snapshot: WeightSnapshot,
    /// Outcome log of an in-memory store.
    memory_log: Vec<OutcomeRecord>,
    dirty: bool,
}

/// Persistent store of strategy weights.
pub struct LearningStore {
    state: RwLock<LearningState>,
    config: LearningConfig,
    strategy_ids: Vec<String>,
    dir: Option<PathBuf>,
}

impl LearningStore {
    /// Open the store in `dir`, replaying outcomes newer than the snapshot.
    ///
    /// `strategy_ids` is the fixed set of strategies that may be recorded.
    pub async fn open<I, S>(dir: impl AsRef<Path>, strategy_ids: I, config: LearningConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", dir.display())))?;

        let mut store = Self::in_memory(strategy_ids, config);
        store.dir = Some(dir);

        {
            let mut state = store.state.write().await;
            if let Some(snapshot) = store.load_snapshot().await? {
                for id in &store.strategy_ids {
                    if let Some(weight) = snapshot.strategies.get(id) {
                        state.snapshot.strategies.insert(id.clone(), weight.clone());
                    }
                }
                state.snapshot.applied_seq = snapshot.applied_seq;
            }

            let pending: Vec<OutcomeRecord> = store
                .read_log()
                .await?
                .into_iter()
                .filter(|r| r.seq > state.snapshot.applied_seq)
                .collect();
            if !pending.is_empty() {
                info!("Replaying {} outcomes newer than the weight snapshot", pending.len());
                for record in &pending {
                    store.apply(&mut state.snapshot, record);
                }
                store.save_snapshot(&state.snapshot).await?;
            }
        }

        info!(
            "Opened learning store with {} strategies",
            store.strategy_ids.len()
        );
        Ok(store)
    }

    /// Create a store that keeps everything in memory.
    pub fn in_memory<I, S>(strategy_ids: I, config: LearningConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strategy_ids: Vec<String> = strategy_ids.into_iter().map(Into::into).collect();
        let snapshot = Self::initial_snapshot(&strategy_ids, &config);
        Self {
            state: RwLock::new(LearningState {
                snapshot,
                memory_log: Vec::new(),
                dirty: false,
            }),
            config,
            strategy_ids,
            dir: None,
        }
    }

    fn initial_snapshot(strategy_ids: &[String], config: &LearningConfig) -> WeightSnapshot {
        WeightSnapshot {
            version: SNAPSHOT_VERSION,
            applied_seq: 0,
            strategies: strategy_ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        StrategyWeight {
                            weight: config.prior(id),
                            count: 0,
                            last_seq: 0,
                            updated_at: None,
                        },
                    )
                })
                .collect(),
        }
    }

    fn log_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(LOG_FILE))
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(SNAPSHOT_FILE))
    }

    /// Record a single outcome.
    pub async fn record(&self, strategy_id: &str, score: f64) -> Result<OutcomeRecord> {
        let mut records = self
            .record_batch(vec![Outcome::new(strategy_id, score)])
            .await?;
        records
            .pop()
            .ok_or_else(|| RetrievalError::Storage("outcome was not recorded".to_string()))
    }

    /// Record outcomes atomically with respect to other writers.
    ///
    /// Nothing is recorded if any outcome names an unknown strategy or
    /// carries a non-finite score. Scores are clamped to `[0, 1]`.
    pub async fn record_batch(&self, outcomes: Vec<Outcome>) -> Result<Vec<OutcomeRecord>> {
        for outcome in &outcomes {
            if !self.strategy_ids.contains(&outcome.strategy_id) {
                return Err(RetrievalError::UnknownStrategy(outcome.strategy_id.clone()));
            }
            if !outcome.score.is_finite() {
                return Err(RetrievalError::InvalidArgument(format!(
                    "score for {} is not finite",
                    outcome.strategy_id
                )));
            }
        }
        if outcomes.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write().await;
        let recorded_at = Utc::now();
        let first_seq = state.snapshot.applied_seq + 1;
        let records: Vec<OutcomeRecord> = outcomes
            .into_iter()
            .zip(first_seq..)
            .map(|(outcome, seq)| OutcomeRecord {
                seq,
                strategy_id: outcome.strategy_id,
                score: outcome.score.clamp(0.0, 1.0),
                query_hash: outcome.query_hash,
                request_id: outcome.request_id,
                recorded_at,
            })
            .collect();

        match self.log_path() {
            Some(path) => append_records(&path, &records).await?,
            None => state.memory_log.extend(records.iter().cloned()),
        }

        for record in &records {
            self.apply(&mut state.snapshot, record);
        }
        state.dirty = true;

        // The log already holds the records, so a failed snapshot only
        // delays persistence until the next flush or replay on open.
        if self.config.flush == FlushPolicy::OnWrite {
            match self.save_snapshot(&state.snapshot).await {
                Ok(()) => state.dirty = false,
                Err(e) => warn!("Weight snapshot not saved, will retry on flush: {e}"),
            }
        }

        Ok(records)
    }

    /// Fold one outcome into the weights.
    fn apply(&self, snapshot: &mut WeightSnapshot, record: &OutcomeRecord) {
        snapshot.applied_seq = snapshot.applied_seq.max(record.seq);

        let Some(entry) = snapshot.strategies.get_mut(&record.strategy_id) else {
            warn!(
                "Skipping outcome {} for unknown strategy {}",
                record.seq, record.strategy_id
            );
            return;
        };

        let alpha = self.config.alpha;
        let updated = (1.0 - alpha) * entry.weight + alpha * record.score;
        entry.weight = updated.clamp(self.config.min_weight, self.config.max_weight);
        entry.count += 1;
        entry.last_seq = record.seq;
        entry.updated_at = Some(record.recorded_at);

        debug!(
            "Strategy {} weight is now {:.4} after score {:.4}",
            record.strategy_id, entry.weight, record.score
        );
    }

    /// Weights of all registered strategies.
    pub async fn current_weights(&self) -> BTreeMap<String, f64> {
        let state = self.state.read().await;
        state
            .snapshot
            .strategies
            .iter()
            .map(|(id, w)| (id.clone(), w.weight))
            .collect()
    }

    /// Full weight state of one strategy.
    pub async fn weight(&self, strategy_id: &str) -> Option<StrategyWeight> {
        let state = self.state.read().await;
        state.snapshot.strategies.get(strategy_id).cloned()
    }

    /// All recorded outcomes, in sequence order.
    pub async fn history(&self) -> Result<Vec<OutcomeRecord>> {
        if self.dir.is_some() {
            let _state = self.state.read().await;
            self.read_log().await
        } else {
            Ok(self.state.read().await.memory_log.clone())
        }
    }

    /// Write the weight snapshot if it has unsaved changes.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.dirty {
            self.save_snapshot(&state.snapshot).await?;
            state.dirty = false;
        }
        Ok(())
    }

    /// Recompute every weight from the full outcome log.
    ///
    /// Returns the number of outcomes replayed.
    pub async fn rebuild_from_log(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let records = match self.dir {
            Some(_) => self.read_log().await?,
            None => state.memory_log.clone(),
        };

        let mut snapshot = Self::initial_snapshot(&self.strategy_ids, &self.config);
        for record in &records {
            self.apply(&mut snapshot, record);
        }
        self.save_snapshot(&snapshot).await?;
        state.snapshot = snapshot;
        state.dirty = false;

        info!("Rebuilt strategy weights from {} outcomes", records.len());
        Ok(records.len())
    }

    async fn load_snapshot(&self) -> Result<Option<WeightSnapshot>> {
        let Some(path) = self.snapshot_path() else {
            return Ok(None);
        };
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;
        match serde_json::from_str::<WeightSnapshot>(&content) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(
                    "Ignoring unreadable weight snapshot {}: {e}",
                    path.display()
                );
                Ok(None)
            }
        }
    }

    async fn save_snapshot(&self, snapshot: &WeightSnapshot) -> Result<()> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(snapshot)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;

        debug!("Saved weight snapshot at seq {}", snapshot.applied_seq);
        Ok(())
    }

    async fn read_log(&self) -> Result<Vec<OutcomeRecord>> {
        let Some(path) = self.log_path() else {
            return Ok(Vec::new());
        };
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| RetrievalError::Storage(format!("{}: {e}", path.display())))?;

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OutcomeRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed outcome at {}:{}: {e}",
                    path.display(),
                    line_no + 1
                ),
            }
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }
}

async fn append_records(path: &Path, records: &[OutcomeRecord]) -> Result<()> {
    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
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
    Ok(())
}
