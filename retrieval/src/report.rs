//! The result of one retrieval request.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attempt::Attempt;
use crate::candidate::{Candidate, RelevanceSignal};
use crate::learning::OutcomeRecord;
use crate::query::Query;
use crate::strategy::StrategyRanking;
use crate::summary::AnswerSummary;

const PREVIEW_CHARS: usize = 120;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// An attempt met the acceptance threshold.
    Accepted,
    /// Every strategy ran out; the best attempt seen is returned.
    Exhausted,
}

/// Final answer of a request plus the full attempt trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub request_id: Uuid,

    /// The caller's original query.
    pub query: Query,

    pub status: RequestStatus,

    /// Strategy that produced the answer.
    pub strategy_id: String,

    /// Aggregate score of the answer.
    pub score: f64,

    /// Trace sequence number of the answering attempt.
    pub answer_sequence: usize,

    pub answer: Vec<Candidate>,

    /// Incident summary of the top answer candidate.
    #[serde(default)]
    pub summary: Option<AnswerSummary>,

    /// Strategy order used for this request.
    pub ranking: StrategyRanking,

    /// Every attempt, in execution order.
    pub attempts: Vec<Attempt>,

    /// Outcomes recorded to the learning store.
    pub outcomes: Vec<OutcomeRecord>,

    pub elapsed_ms: u64,
}

impl RetrievalReport {
    /// The attempt whose candidates form the answer.
    pub fn answer_attempt(&self) -> Option<&Attempt> {
        self.attempts
            .iter()
            .find(|a| a.sequence == self.answer_sequence)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == RequestStatus::Accepted
    }
}

impl fmt::Display for RetrievalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            RequestStatus::Accepted => "accepted",
            RequestStatus::Exhausted => "exhausted",
        };
        writeln!(
            f,
            "Query: {}\nResult: {status} via {} (score {:.3}, {}ms)",
            self.query, self.strategy_id, self.score, self.elapsed_ms
        )?;

        let ranking: Vec<String> = self
            .ranking
            .iter()
            .map(|r| format!("{} ({:.3})", r.strategy.id(), r.weight))
            .collect();
        writeln!(f, "Ranking: {}", ranking.join(", "))?;

        if let Some(summary) = &self.summary {
            writeln!(f, "\nSummary ({}):", summary.source_id)?;
            for line in summary.to_string().lines() {
                writeln!(f, "  {line}")?;
            }
        }

        writeln!(f, "\nAttempts:")?;
        for attempt in &self.attempts {
            let result = match (&attempt.score, &attempt.error) {
                (Some(score), _) => format!(
                    "{} candidates, score {:.3} (relevance {:.3}, coverage {:.3}, overlap {:.3})",
                    attempt.candidates.len(),
                    score.aggregate,
                    score.relevance,
                    score.coverage,
                    score.overlap
                ),
                (None, Some(error)) => format!("unavailable: {error}"),
                (None, None) => "unavailable".to_string(),
            };
            writeln!(
                f,
                "  {}. {} #{} \"{}\" -> {result} [{}]",
                attempt.sequence,
                attempt.strategy_id,
                attempt.strategy_attempt,
                attempt.query,
                attempt.outcome.as_str()
            )?;
        }

        writeln!(f, "\nAnswer:")?;
        for candidate in &self.answer {
            writeln!(
                f,
                "  {}. {} ({})",
                candidate.rank + 1,
                candidate.source_id,
                describe_signal(&candidate.signal)
            )?;
            writeln!(f, "     {}", preview(&candidate.content))?;
        }

        Ok(())
    }
}

fn describe_signal(signal: &RelevanceSignal) -> String {
    match signal {
        RelevanceSignal::Similarity { value } => format!("similarity {value:.3}"),
        RelevanceSignal::Lexical { value } => format!("bm25 {value:.3}"),
        RelevanceSignal::Hybrid { fused, .. } => format!("rrf {fused:.4}"),
    }
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("a\n  b"), "a b");
    }
}
