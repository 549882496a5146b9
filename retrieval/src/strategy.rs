//! Retrieval strategies and the strategy registry.
//!
//! The registry is fixed at startup. Its only dynamic input is the weight
//! snapshot handed to [`StrategyRegistry::list`], which makes ranking a pure
//! function of those weights.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LearningConfig, StrategySpec};
use crate::error::{Result, RetrievalError};

/// How a strategy retrieves candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Embedding similarity search.
    Vector,
    /// BM25 keyword search.
    Keyword,
    /// Both searches fused, `alpha` weighting the vector side.
    Hybrid { alpha: f32 },
}

impl StrategyKind {
    /// Parse a strategy id: `vector`, `keyword`, `hybrid` or `hybrid:<alpha>`.
    pub fn parse(id: &str) -> Result<Self> {
        match id {
            "vector" => return Ok(Self::Vector),
            "keyword" => return Ok(Self::Keyword),
            "hybrid" => return Ok(Self::Hybrid { alpha: 0.5 }),
            _ => {}
        }

        let alpha = id
            .strip_prefix("hybrid:")
            .ok_or_else(|| RetrievalError::UnknownStrategy(id.to_string()))?;
        let alpha: f32 = alpha.parse().map_err(|_| {
            RetrievalError::Config(format!("invalid hybrid alpha in strategy id: {id}"))
        })?;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RetrievalError::Config(format!(
                "hybrid alpha must be within [0, 1]: {id}"
            )));
        }
        Ok(Self::Hybrid { alpha })
    }
}

/// A declared retrieval strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    id: String,
    kind: StrategyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
}

impl Strategy {
    /// Create a strategy from its id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let kind = StrategyKind::parse(&id)?;
        Ok(Self {
            id,
            kind,
            top_k: None,
        })
    }

    /// Override how many candidates this strategy requests.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Candidates to request, falling back to `default`.
    pub fn top_k(&self, default: usize) -> usize {
        self.top_k.unwrap_or(default)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A strategy paired with the weight it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStrategy {
    pub strategy: Strategy,
    pub weight: f64,
}

/// Strategies ordered by descending weight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyRanking {
    entries: Vec<RankedStrategy>,
}

impl StrategyRanking {
    pub fn get(&self, rank: usize) -> Option<&RankedStrategy> {
        self.entries.get(rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedStrategy> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.strategy.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The set of strategies available to the controller.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
    /// Learning settings supplying the starting weight of each strategy.
    learning: LearningConfig,
}

impl StrategyRegistry {
    /// Create a registry. Declaration order breaks weight ties.
    pub fn new(strategies: Vec<Strategy>) -> Result<Self> {
        if strategies.is_empty() {
            return Err(RetrievalError::Config(
                "at least one strategy must be registered".to_string(),
            ));
        }
        for (i, strategy) in strategies.iter().enumerate() {
            if strategies[..i].iter().any(|s| s.id == strategy.id) {
                return Err(RetrievalError::Config(format!(
                    "duplicate strategy: {}",
                    strategy.id
                )));
            }
            if strategy.top_k == Some(0) {
                return Err(RetrievalError::Config(format!(
                    "strategy {} top_k must be positive",
                    strategy.id
                )));
            }
        }
        Ok(Self {
            strategies,
            learning: LearningConfig::default(),
        })
    }

    /// Rank strategies missing from a weight snapshot by the starting
    /// weights of `learning`.
    pub fn with_learning(mut self, learning: &LearningConfig) -> Self {
        self.learning = learning.clone();
        self
    }

    /// Create a registry from configured strategy declarations.
    pub fn from_specs(specs: &[StrategySpec]) -> Result<Self> {
        let strategies = specs
            .iter()
            .map(|spec| {
                let strategy = Strategy::new(&spec.id)?;
                Ok(match spec.top_k {
                    Some(top_k) => strategy.with_top_k(top_k),
                    None => strategy,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(strategies)
    }

    /// Look up a strategy by id.
    pub fn get(&self, id: &str) -> Result<&Strategy> {
        self.strategies
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| RetrievalError::UnknownStrategy(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.iter().any(|s| s.id == id)
    }

    /// Strategy ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategies.iter().map(|s| s.id.as_str())
    }

    /// Rank all strategies by descending weight.
    ///
    /// Equal weights keep declaration order. Strategies absent from
    /// `weights` rank with their starting weight ([`LearningConfig::prior`]).
    pub fn list(&self, weights: &BTreeMap<String, f64>) -> StrategyRanking {
        let mut entries: Vec<RankedStrategy> = self
            .strategies
            .iter()
            .map(|strategy| RankedStrategy {
                weight: weights
                    .get(&strategy.id)
                    .copied()
                    .unwrap_or_else(|| self.learning.prior(&strategy.id)),
                strategy: strategy.clone(),
            })
            .collect();

        // Stable sort, descending
        entries.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let ranking = StrategyRanking { entries };
        debug!("Strategy ranking: {:?}", ranking.ids());
        ranking
    }
}
