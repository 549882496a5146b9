//! Attempt records forming a request trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::query::Query;
use crate::scorer::ScoreBreakdown;

/// What the controller decided after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Score met the threshold; the request ends here.
    Accepted,
    /// The same strategy runs again.
    Retried,
    /// The strategy is abandoned for this request.
    Exhausted,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Retried => "retried",
            Self::Exhausted => "exhausted",
        }
    }
}

/// One strategy execution within a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Position in the request trace, starting at one.
    pub sequence: usize,

    /// Attempt number within this strategy, starting at one.
    pub strategy_attempt: usize,

    pub strategy_id: String,

    pub query: Query,

    pub candidates: Vec<Candidate>,

    /// Absent when retrieval was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreBreakdown>,

    /// Why retrieval was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub outcome: AttemptOutcome,

    pub started_at: DateTime<Utc>,

    pub elapsed_ms: u64,
}

impl Attempt {
    /// Aggregate score, if the attempt was scored.
    pub fn aggregate_score(&self) -> Option<f64> {
        self.score.as_ref().map(|s| s.aggregate)
    }

    /// Whether retrieval failed for this attempt.
    pub fn is_unavailable(&self) -> bool {
        self.score.is_none()
    }

    /// Whether this attempt could serve as a final answer.
    pub fn has_answer(&self) -> bool {
        self.score.is_some() && !self.candidates.is_empty()
    }
}
