//! Scoring of candidate sets.
//!
//! The default [`WeightedScorer`] combines three factors, each in `[0, 1]`:
//!
//! - **relevance**: `0.6 * best + 0.4 * mean` of the normalized candidate signals
//! - **coverage**: candidates returned over candidates requested
//! - **overlap**: share of query keywords found in any candidate
//!
//! Signals are normalized per kind: cosine similarity is clamped to `[0, 1]`,
//! a lexical score `s` becomes `s / (s + saturation)`, and a hybrid signal
//! blends both sides by its alpha (a missing side contributes zero).

use std::collections::HashSet;

use adaptive_index::text::{tokenize, unique_keywords};
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, RelevanceSignal};
use crate::config::ScorerConfig;
use crate::query::Query;

const BEST_SHARE: f64 = 0.6;

/// Per-candidate contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub source_id: String,
    /// Normalized relevance signal.
    pub relevance: f64,
    /// Share of query keywords in this candidate.
    pub overlap: f64,
}

/// An aggregate score with the factors that produced it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Aggregate in `[0, 1]`, compared against the acceptance threshold.
    pub aggregate: f64,
    pub relevance: f64,
    pub coverage: f64,
    pub overlap: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateScore>,
}

impl ScoreBreakdown {
    /// A breakdown carrying only an aggregate value.
    pub fn aggregate_only(aggregate: f64) -> Self {
        Self {
            aggregate,
            ..Default::default()
        }
    }
}

/// Maps a candidate set to a comparable score.
///
/// Implementations must be deterministic and return an aggregate in
/// `[0, 1]`; an empty candidate set scores zero.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &Query, candidates: &[Candidate], top_k: usize) -> ScoreBreakdown;
}

/// Weighted relevance, coverage and overlap scorer.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    relevance_weight: f64,
    coverage_weight: f64,
    overlap_weight: f64,
    lexical_saturation: f64,
}

impl WeightedScorer {
    /// Build a scorer, normalizing the factor weights to sum to one.
    pub fn new(config: &ScorerConfig) -> Self {
        let total = config.relevance_weight + config.coverage_weight + config.overlap_weight;
        let total = if total > 0.0 { total } else { 1.0 };
        Self {
            relevance_weight: config.relevance_weight / total,
            coverage_weight: config.coverage_weight / total,
            overlap_weight: config.overlap_weight / total,
            lexical_saturation: config.lexical_saturation,
        }
    }

    /// Map a native signal into `[0, 1]`.
    pub fn normalize_signal(&self, signal: &RelevanceSignal) -> f64 {
        match *signal {
            RelevanceSignal::Similarity { value } => clamp_similarity(value),
            RelevanceSignal::Lexical { value } => self.saturate(value),
            RelevanceSignal::Hybrid {
                similarity,
                lexical,
                alpha,
                ..
            } => {
                let alpha = f64::from(alpha).clamp(0.0, 1.0);
                let similarity = similarity.map(clamp_similarity).unwrap_or(0.0);
                let lexical = lexical.map(|v| self.saturate(v)).unwrap_or(0.0);
                alpha * similarity + (1.0 - alpha) * lexical
            }
        }
    }

    fn saturate(&self, value: f32) -> f64 {
        let value = f64::from(value);
        if value.is_finite() && value > 0.0 {
            value / (value + self.lexical_saturation)
        } else {
            0.0
        }
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(&ScorerConfig::default())
    }
}

fn clamp_similarity(value: f32) -> f64 {
    if value.is_finite() {
        f64::from(value).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, query: &Query, candidates: &[Candidate], top_k: usize) -> ScoreBreakdown {
        if candidates.is_empty() || top_k == 0 {
            return ScoreBreakdown::default();
        }

        let query_terms = unique_keywords(query.text());
        let mut covered: HashSet<&str> = HashSet::new();

        let per_candidate: Vec<CandidateScore> = candidates
            .iter()
            .map(|candidate| {
                let tokens: HashSet<String> = tokenize(&candidate.content).into_iter().collect();
                let matched: Vec<&str> = query_terms
                    .iter()
                    .filter(|term| tokens.contains(*term))
                    .map(String::as_str)
                    .collect();
                let overlap = fraction(matched.len(), query_terms.len());
                covered.extend(matched);
                CandidateScore {
                    source_id: candidate.source_id.clone(),
                    relevance: self.normalize_signal(&candidate.signal),
                    overlap,
                }
            })
            .collect();

        let best = per_candidate
            .iter()
            .map(|c| c.relevance)
            .fold(0.0_f64, f64::max);
        let mean = per_candidate.iter().map(|c| c.relevance).sum::<f64>() / per_candidate.len() as f64;
        let relevance = BEST_SHARE * best + (1.0 - BEST_SHARE) * mean;
        let coverage = fraction(candidates.len().min(top_k), top_k);
        let overlap = fraction(covered.len(), query_terms.len());

        let aggregate = (self.relevance_weight * relevance
            + self.coverage_weight * coverage
            + self.overlap_weight * overlap)
            .clamp(0.0, 1.0);

        ScoreBreakdown {
            aggregate,
            relevance,
            coverage,
            overlap,
            candidates: per_candidate,
        }
    }
}

fn fraction(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
