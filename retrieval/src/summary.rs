//! Incident summary built from the top answer candidate.
//!
//! The summary reads well-known metadata fields of the best candidate and
//! falls back to fixed placeholders, so the same answer always yields the
//! same text.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::candidate::Candidate;

const UNKNOWN_COMPONENT: &str = "UNKNOWN";
const UNKNOWN_ERROR_CODE: &str = "N/A";
const DEFAULT_SUGGESTED_FIX: &str =
    "Review the connection pool settings, the client retry logic and the cluster configuration.";

/// A structured reading of the best answer candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSummary {
    /// Candidate the summary was built from.
    pub source_id: String,
    pub component: String,
    pub error_code: String,
    pub likely_cause: String,
    pub suggested_fix: String,
}

impl AnswerSummary {
    /// Summarize the first candidate of an answer list.
    pub fn from_candidates(candidates: &[Candidate]) -> Option<Self> {
        candidates.first().map(Self::from_candidate)
    }

    /// Summarize one candidate.
    ///
    /// `component`, `error_code` and `suggested_fix` come from metadata.
    /// The cause prefers `normalized_message`, then `raw_log`, then the
    /// candidate content.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let field = |key: &str| -> Option<String> {
            candidate
                .metadata
                .as_ref()
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(flatten)
                .filter(|s| !s.is_empty())
        };

        Self {
            source_id: candidate.source_id.clone(),
            component: field("component").unwrap_or_else(|| UNKNOWN_COMPONENT.to_string()),
            error_code: field("error_code").unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
            likely_cause: field("normalized_message")
                .or_else(|| field("raw_log"))
                .unwrap_or_else(|| flatten(&candidate.content)),
            suggested_fix: field("suggested_fix")
                .unwrap_or_else(|| DEFAULT_SUGGESTED_FIX.to_string()),
        }
    }
}

impl fmt::Display for AnswerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Component: {}", self.component)?;
        writeln!(f, "Error Code: {}", self.error_code)?;
        writeln!(f, "Likely Cause: {}", self.likely_cause)?;
        writeln!(f, "Suggested Fix: {}", self.suggested_fix)
    }
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::RelevanceSignal;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn candidate(id: &str, content: &str, metadata: Option<Value>) -> Candidate {
        Candidate {
            source_id: id.to_string(),
            content: content.to_string(),
            metadata,
            signal: RelevanceSignal::Lexical { value: 1.0 },
            rank: 0,
        }
    }

    #[test]
    fn test_summary_reads_metadata_fields() {
        let top = candidate(
            "pool",
            "ignored when a normalized message exists",
            Some(json!({
                "component": "driver",
                "error_code": "MongoWaitQueueFullError",
                "normalized_message": "connection pool   exhausted",
                "suggested_fix": "Raise maxPoolSize.",
            })),
        );

        let summary = AnswerSummary::from_candidates(&[top, candidate("other", "x", None)]).unwrap();

        assert_eq!(
            summary,
            AnswerSummary {
                source_id: "pool".to_string(),
                component: "driver".to_string(),
                error_code: "MongoWaitQueueFullError".to_string(),
                likely_cause: "connection pool exhausted".to_string(),
                suggested_fix: "Raise maxPoolSize.".to_string(),
            }
        );
    }

    #[test]
    fn test_summary_falls_back_to_content() {
        let bare = candidate("disk", "No space left\non device", Some(json!({ "component": 7 })));
        let summary = AnswerSummary::from_candidate(&bare);

        assert_eq!(summary.component, UNKNOWN_COMPONENT);
        assert_eq!(summary.error_code, UNKNOWN_ERROR_CODE);
        assert_eq!(summary.likely_cause, "No space left on device");
        assert_eq!(summary.suggested_fix, DEFAULT_SUGGESTED_FIX);

        let text = summary.to_string();
        assert!(text.starts_with("Component: UNKNOWN\nError Code: N/A\n"));
        assert!(text.contains("Likely Cause: No space left on device\n"));
    }

    #[test]
    fn test_no_summary_without_candidates() {
        assert_eq!(AnswerSummary::from_candidates(&[]), None);
    }
}
