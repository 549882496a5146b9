//! Configuration for the adaptive retrieval core.
//!
//! Every section defaults, so a partial TOML file is valid:
//!
//! ```toml
//! [controller]
//! threshold = 0.7
//! max_attempts = 3
//!
//! [[strategies]]
//! id = "vector"
//!
//! [[strategies]]
//! id = "hybrid:0.3"
//! top_k = 10
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration for the adaptive retrieval core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Control loop settings.
    pub controller: ControllerConfig,

    /// Scoring weights.
    pub scorer: ScorerConfig,

    /// Query rewriting settings.
    pub rewriter: RewriterConfig,

    /// Strategy weight learning settings.
    pub learning: LearningConfig,

    /// Strategies in declaration order. Declaration order breaks weight ties.
    pub strategies: Vec<StrategySpec>,
}

impl AdaptiveConfig {
    /// Load and validate a TOML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the controller configuration.
    pub fn with_controller(mut self, config: ControllerConfig) -> Self {
        self.controller = config;
        self
    }

    /// Set the scorer configuration.
    pub fn with_scorer(mut self, config: ScorerConfig) -> Self {
        self.scorer = config;
        self
    }

    /// Set the rewriter configuration.
    pub fn with_rewriter(mut self, config: RewriterConfig) -> Self {
        self.rewriter = config;
        self
    }

    /// Set the learning configuration.
    pub fn with_learning(mut self, config: LearningConfig) -> Self {
        self.learning = config;
        self
    }

    /// Replace the strategy list.
    pub fn with_strategies(mut self, strategies: Vec<StrategySpec>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Check every section for values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.controller;
        if !(0.0..=1.0).contains(&c.threshold) {
            return Err(config_error(format!(
                "controller.threshold must be within [0, 1], got {}",
                c.threshold
            )));
        }
        if c.max_attempts == 0 {
            return Err(config_error("controller.max_attempts must be positive"));
        }
        if c.top_k == 0 {
            return Err(config_error("controller.top_k must be positive"));
        }

        let s = &self.scorer;
        let weights = [s.relevance_weight, s.coverage_weight, s.overlap_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0
        {
            return Err(config_error(
                "scorer weights must be non-negative and not all zero",
            ));
        }
        if !(s.lexical_saturation.is_finite() && s.lexical_saturation > 0.0) {
            return Err(config_error("scorer.lexical_saturation must be positive"));
        }

        let l = &self.learning;
        if !(l.alpha > 0.0 && l.alpha <= 1.0) {
            return Err(config_error(format!(
                "learning.alpha must be within (0, 1], got {}",
                l.alpha
            )));
        }
        if !(l.min_weight.is_finite() && l.max_weight.is_finite() && l.min_weight < l.max_weight) {
            return Err(config_error(
                "learning.min_weight must be below learning.max_weight",
            ));
        }
        for (id, weight) in std::iter::once(("initial_weight", &l.initial_weight))
            .chain(l.priors.iter().map(|(id, w)| (id.as_str(), w)))
        {
            if !(l.min_weight..=l.max_weight).contains(weight) {
                return Err(config_error(format!(
                    "learning weight for {id} must be within [{}, {}], got {weight}",
                    l.min_weight, l.max_weight
                )));
            }
        }

        if self.strategies.is_empty() {
            return Err(config_error("at least one strategy must be configured"));
        }
        for (i, spec) in self.strategies.iter().enumerate() {
            if self.strategies[..i].iter().any(|s| s.id == spec.id) {
                return Err(config_error(format!("duplicate strategy: {}", spec.id)));
            }
            if spec.top_k == Some(0) {
                return Err(config_error(format!(
                    "strategy {} top_k must be positive",
                    spec.id
                )));
            }
        }
        if let Some(id) = l
            .priors
            .keys()
            .find(|id| !self.strategies.iter().any(|s| &s.id == *id))
        {
            return Err(config_error(format!("prior for undeclared strategy: {id}")));
        }

        Ok(())
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            scorer: ScorerConfig::default(),
            rewriter: RewriterConfig::default(),
            learning: LearningConfig::default(),
            strategies: vec![
                StrategySpec::new("vector"),
                StrategySpec::new("keyword"),
                StrategySpec::new("hybrid:0.5"),
            ],
        }
    }
}

fn config_error(message: impl Into<String>) -> RetrievalError {
    RetrievalError::Config(message.into())
}

/// Configuration for the adaptive control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Aggregate score at or above which an attempt is accepted.
    pub threshold: f64,

    /// Maximum attempts per strategy within one request.
    pub max_attempts: usize,

    /// Default number of candidates requested per attempt.
    pub top_k: usize,

    /// Per-call retrieval timeout in milliseconds (0 disables).
    pub retrieval_timeout_ms: u64,
}

impl ControllerConfig {
    /// The retrieval timeout, if enabled.
    pub fn retrieval_timeout(&self) -> Option<Duration> {
        (self.retrieval_timeout_ms > 0).then(|| Duration::from_millis(self.retrieval_timeout_ms))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_attempts: 3,
            top_k: 5,
            retrieval_timeout_ms: 30_000,
        }
    }
}

/// Weights of the factors combined into an aggregate score.
///
/// Weights are normalized to sum to one when the scorer is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Weight of candidate relevance magnitude.
    #[serde(rename = "relevance")]
    pub relevance_weight: f64,

    /// Weight of result-set coverage (results returned / top_k).
    #[serde(rename = "coverage")]
    pub coverage_weight: f64,

    /// Weight of query-term overlap with candidate content.
    #[serde(rename = "overlap")]
    pub overlap_weight: f64,

    /// Lexical score mapped to 0.5 relevance; BM25 score `s` becomes
    /// `s / (s + lexical_saturation)`.
    pub lexical_saturation: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            coverage_weight: 0.2,
            overlap_weight: 0.3,
            lexical_saturation: 2.0,
        }
    }
}

/// Configuration for query rewriting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    /// Terms appended by the expansion rewrite.
    pub expansion_terms: String,

    /// Maximum terms borrowed from prior candidates by the narrowing rewrite.
    pub max_context_terms: usize,

    /// Single-word substitutions used by the synonym rewrite.
    pub synonyms: BTreeMap<String, String>,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        let synonyms = [
            ("slow", "latency"),
            ("error", "failure"),
            ("crash", "failure"),
            ("db", "database"),
            ("auth", "authentication"),
            ("config", "configuration"),
            ("conn", "connection"),
            ("timeout", "timed-out"),
            ("perf", "performance"),
            ("oom", "out-of-memory"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        Self {
            expansion_terms: "production error root cause".to_string(),
            max_context_terms: 3,
            synonyms,
        }
    }
}

/// When the learning store writes its weight snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// After every recorded outcome batch.
    OnWrite,
    /// Only on an explicit flush. The outcome log is still appended per write.
    OnShutdown,
}

/// Configuration for strategy weight learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// EMA smoothing factor: `w = (1 - alpha) * w + alpha * score`.
    pub alpha: f64,

    /// Weight of a strategy with no history.
    pub initial_weight: f64,

    /// Per-strategy starting weights overriding `initial_weight`.
    pub priors: BTreeMap<String, f64>,

    /// Lower weight bound.
    pub min_weight: f64,

    /// Upper weight bound.
    pub max_weight: f64,

    /// Snapshot flush policy.
    pub flush: FlushPolicy,

    /// Directory holding the outcome log and weight snapshot.
    pub state_dir: Option<PathBuf>,
}

impl LearningConfig {
    /// Directory holding learning state, defaulting to the user data dir.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_default()
                .join("adaptive-retrieval")
        })
    }

    /// Starting weight for a strategy.
    pub fn prior(&self, strategy_id: &str) -> f64 {
        self.priors
            .get(strategy_id)
            .copied()
            .unwrap_or(self.initial_weight)
    }

    /// Set the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Set a starting weight for one strategy.
    pub fn with_prior(mut self, strategy_id: impl Into<String>, weight: f64) -> Self {
        self.priors.insert(strategy_id.into(), weight);
        self
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            initial_weight: 0.5,
            priors: BTreeMap::new(),
            min_weight: 0.0,
            max_weight: 1.0,
            flush: FlushPolicy::OnWrite,
            state_dir: None,
        }
    }
}

/// A declared strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    /// Strategy id: `vector`, `keyword`, `hybrid` or `hybrid:<alpha>`.
    pub id: String,

    /// Candidates requested by this strategy, overriding `controller.top_k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl StrategySpec {
    /// Declare a strategy by id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            top_k: None,
        }
    }

    /// Override the number of candidates for this strategy.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}
