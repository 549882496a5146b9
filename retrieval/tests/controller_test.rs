//! Integration tests for the adaptive control loop.
//!
//! Most tests drive the controller with a scripted index whose hits carry
//! preset signal values and a scorer that reports the top signal as the
//! aggregate score, so every score in a trace is chosen by the test.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adaptive_embeddings::HashingProvider;
use adaptive_index::{
    CorpusStore, IndexError, IndexProvider, KeywordHit, MemoryIndex, Result as IndexResult,
    VectorHit,
};
use adaptive_retrieval::{
    AdaptiveConfig, AdaptiveController, AttemptLog, AttemptOutcome, Candidate, ControllerConfig,
    LearningConfig, LearningStore, Query, RequestStatus, RetrievalError, RetrievalReport,
    ScoreBreakdown, Scorer, StrategySpec,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// One scripted response from the index.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Return a single hit with this signal value.
    Hit(f32),
    /// Return no hits.
    Empty,
    /// Fail the call.
    Down,
}

/// An index replaying a fixed script per search kind. The last step repeats.
#[derive(Default)]
struct ScriptedIndex {
    vector: Vec<Step>,
    keyword: Vec<Step>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl ScriptedIndex {
    fn new(vector: &[Step], keyword: &[Step]) -> Self {
        Self {
            vector: vector.to_vec(),
            keyword: keyword.to_vec(),
            ..Default::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn next(&self, kind: &'static str) -> Step {
        let script = if kind == "vector" {
            &self.vector
        } else {
            &self.keyword
        };
        let mut calls = self.calls.lock().unwrap();
        let call = calls.entry(kind).or_default();
        let step = script
            .get(*call)
            .or_else(|| script.last())
            .copied()
            .unwrap_or(Step::Down);
        *call += 1;
        step
    }

    fn calls(&self, kind: &'static str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl IndexProvider for ScriptedIndex {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn vector_search(&self, _embedding: &[f32], _top_k: usize) -> IndexResult<Vec<VectorHit>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next("vector") {
            Step::Hit(similarity) => Ok(vec![VectorHit {
                id: format!("v-{similarity}"),
                content: "vector hit".to_string(),
                metadata: None,
                similarity,
            }]),
            Step::Empty => Ok(Vec::new()),
            Step::Down => Err(IndexError::Storage("vector store offline".to_string())),
        }
    }

    async fn keyword_search(&self, _text: &str, _top_k: usize) -> IndexResult<Vec<KeywordHit>> {
        match self.next("keyword") {
            Step::Hit(score) => Ok(vec![KeywordHit {
                id: format!("k-{score}"),
                content: "keyword hit".to_string(),
                metadata: None,
                score,
            }]),
            Step::Empty => Ok(Vec::new()),
            Step::Down => Err(IndexError::Storage("keyword store offline".to_string())),
        }
    }
}

/// Scores a candidate set by its top candidate's raw signal.
struct TopSignalScorer;

impl Scorer for TopSignalScorer {
    fn score(&self, _query: &Query, candidates: &[Candidate], _top_k: usize) -> ScoreBreakdown {
        let top = candidates
            .first()
            .map(|c| f64::from(c.signal.raw()))
            .unwrap_or(0.0);
        ScoreBreakdown::aggregate_only(top)
    }
}

fn config(max_attempts: usize, priors: &[(&str, f64)]) -> AdaptiveConfig {
    let learning = priors
        .iter()
        .fold(LearningConfig::default(), |config, (id, weight)| {
            config.with_prior(*id, *weight)
        });
    AdaptiveConfig::default()
        .with_controller(ControllerConfig {
            max_attempts,
            ..Default::default()
        })
        .with_learning(learning)
        .with_strategies(vec![StrategySpec::new("vector"), StrategySpec::new("keyword")])
}

fn controller(
    config: &AdaptiveConfig,
    index: Arc<ScriptedIndex>,
) -> (AdaptiveController, Arc<LearningStore>) {
    let learning = Arc::new(LearningStore::in_memory(
        ["vector", "keyword"],
        config.learning.clone(),
    ));
    let controller = AdaptiveController::new(
        config,
        index,
        Arc::new(HashingProvider::new()),
        learning.clone(),
    )
    .unwrap()
    .with_scorer(Arc::new(TopSignalScorer));
    (controller, learning)
}

/// (strategy, score, outcome) per attempt.
fn trace(report: &RetrievalReport) -> Vec<(String, Option<f64>, AttemptOutcome)> {
    report
        .attempts
        .iter()
        .map(|a| (a.strategy_id.clone(), a.aggregate_score(), a.outcome))
        .collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn test_first_attempt_accepted_raises_weight() {
    let config = config(3, &[("vector", 0.8), ("keyword", 0.5)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.9)], &[Step::Hit(0.9)]));
    let (controller, learning) = controller(&config, index.clone());

    let report = controller.retrieve("database slow sometimes").await.unwrap();

    assert_eq!(report.status, RequestStatus::Accepted);
    assert_eq!(report.strategy_id, "vector");
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Accepted);
    assert_eq!(index.calls("keyword"), 0);

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].strategy_id, "vector");
    let weight = learning.current_weights().await["vector"];
    assert!(weight > 0.8);
    assert_close(weight, 0.7 * 0.8 + 0.3 * 0.9);
}

#[tokio::test]
async fn test_falls_back_to_next_strategy() {
    let config = config(2, &[("vector", 0.8), ("keyword", 0.5)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.4)], &[Step::Hit(0.75)]));
    let (controller, learning) = controller(&config, index);

    let report = controller.retrieve("database slow sometimes").await.unwrap();

    let trace = trace(&report);
    assert_eq!(trace.len(), 3);
    assert_eq!(trace[0].0, "vector");
    assert_eq!(trace[0].2, AttemptOutcome::Retried);
    assert_eq!(trace[1].0, "vector");
    assert_eq!(trace[1].2, AttemptOutcome::Exhausted);
    assert_eq!(trace[2].0, "keyword");
    assert_eq!(trace[2].2, AttemptOutcome::Accepted);
    assert_ne!(report.attempts[0].query, report.attempts[1].query);
    assert!(report.attempts[2].query.is_original());

    assert_eq!(report.status, RequestStatus::Accepted);
    assert_eq!(report.strategy_id, "keyword");

    let recorded: Vec<&str> = report
        .outcomes
        .iter()
        .map(|o| o.strategy_id.as_str())
        .collect();
    assert_eq!(recorded, vec!["vector", "keyword"]);
    assert_close(report.outcomes[0].score, 0.4);
    assert_close(report.outcomes[1].score, 0.75);

    let weights = learning.current_weights().await;
    assert!(weights["vector"] < 0.8);
    assert!(weights["keyword"] > 0.5);
}

#[tokio::test]
async fn test_all_unavailable_is_no_candidates() {
    let config = config(2, &[]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Down], &[Step::Down]));
    let (controller, learning) = controller(&config, index.clone());

    let result = controller.retrieve("replica lag").await;

    assert!(matches!(
        result,
        Err(RetrievalError::NoCandidates { attempts: 4 })
    ));
    assert_eq!(index.calls("vector"), 2);
    assert_eq!(index.calls("keyword"), 2);
    assert!(learning.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_attempt_log_covers_requests_without_candidates() {
    let config = config(2, &[]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Down], &[Step::Empty]));
    let log = Arc::new(AttemptLog::in_memory());
    let (controller, _) = controller(&config, index);
    let controller = controller.with_attempt_log(log.clone());

    let result = controller.retrieve("replica lag").await;
    assert!(matches!(
        result,
        Err(RetrievalError::NoCandidates { attempts: 4 })
    ));

    let metrics = log.read_all().await.unwrap();
    let rows: Vec<(usize, &str, Option<f64>, AttemptOutcome)> = metrics
        .iter()
        .map(|m| (m.sequence, m.strategy_id.as_str(), m.score, m.outcome))
        .collect();
    assert_eq!(
        rows,
        vec![
            (1, "vector", None, AttemptOutcome::Retried),
            (2, "vector", None, AttemptOutcome::Exhausted),
            (3, "keyword", Some(0.0), AttemptOutcome::Retried),
            (4, "keyword", Some(0.0), AttemptOutcome::Exhausted),
        ]
    );
    assert!(metrics.iter().all(|m| m.query == "replica lag"));
    assert_ne!(metrics[2].executed_query, metrics[3].executed_query);
}

#[tokio::test]
async fn test_attempt_log_matches_report_trace() {
    let config = config(2, &[("vector", 0.8), ("keyword", 0.5)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.4)], &[Step::Hit(0.75)]));
    let log = Arc::new(AttemptLog::in_memory());
    let (controller, _) = controller(&config, index);
    let controller = controller.with_attempt_log(log.clone());

    let report = controller.retrieve("database slow sometimes").await.unwrap();

    let logged: Vec<(String, Option<f64>, AttemptOutcome)> = log
        .read_all()
        .await
        .unwrap()
        .into_iter()
        .map(|m| {
            assert_eq!(m.request_id, report.request_id);
            (m.strategy_id, m.score, m.outcome)
        })
        .collect();
    assert_eq!(logged, trace(&report));
}

#[tokio::test]
async fn test_report_summarizes_top_candidate() {
    let config = config(3, &[("vector", 0.8)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.9)], &[Step::Hit(0.9)]));
    let (controller, _) = controller(&config, index);

    let report = controller.retrieve("database slow sometimes").await.unwrap();

    let summary = report.summary.clone().unwrap();
    assert_eq!(summary.source_id, report.answer[0].source_id);
    assert_eq!(summary.component, "UNKNOWN");
    assert_eq!(summary.error_code, "N/A");
    assert_eq!(summary.likely_cause, "vector hit");

    let text = report.to_string();
    assert!(text.contains("Component: UNKNOWN"));
    assert!(text.contains("Likely Cause: vector hit"));
    assert!(text.contains("Suggested Fix: "));
}

#[tokio::test]
async fn test_unavailable_retries_same_query() {
    let config = config(3, &[("vector", 0.9)]);
    let index = Arc::new(ScriptedIndex::new(
        &[Step::Down, Step::Hit(0.95)],
        &[Step::Empty],
    ));
    let (controller, _) = controller(&config, index);

    let report = controller.retrieve("oplog window").await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts[0].is_unavailable());
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Retried);
    assert_eq!(report.attempts[0].query, report.attempts[1].query);
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Accepted);
}

#[tokio::test]
async fn test_retry_budget_is_respected() {
    let config = config(3, &[]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.1)], &[Step::Hit(0.1)]));
    let (controller, _) = controller(&config, index.clone());

    let report = controller
        .retrieve("why are writes stalling on the primary")
        .await
        .unwrap();

    assert!(index.calls("vector") <= 3);
    assert!(index.calls("keyword") <= 3);
    for strategy in ["vector", "keyword"] {
        let attempts: Vec<_> = report
            .attempts
            .iter()
            .filter(|a| a.strategy_id == strategy)
            .collect();
        assert!(attempts.len() <= 3);
        assert_eq!(attempts.last().unwrap().outcome, AttemptOutcome::Exhausted);
        for (i, attempt) in attempts.iter().enumerate() {
            for earlier in &attempts[..i] {
                assert_ne!(attempt.query.normalized(), earlier.query.normalized());
            }
        }
    }
}

#[tokio::test]
async fn test_exhaustion_returns_global_best() {
    let config = config(2, &[("vector", 0.8)]);
    let index = Arc::new(ScriptedIndex::new(
        &[Step::Hit(0.3), Step::Hit(0.5)],
        &[Step::Hit(0.45), Step::Empty],
    ));
    let (controller, learning) = controller(&config, index);

    let report = controller.retrieve("election failover").await.unwrap();

    assert_eq!(report.status, RequestStatus::Exhausted);
    assert_eq!(report.strategy_id, "vector");
    assert_close(report.score, 0.5);
    assert_eq!(report.answer_sequence, 2);
    assert_eq!(report.answer_attempt().unwrap().strategy_attempt, 2);

    // Keyword's final score is the empty second attempt.
    let history = learning.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_close(history[1].score, 0.0);
}

#[tokio::test]
async fn test_empty_results_never_accepted() {
    let mut config = config(1, &[]);
    config.controller.threshold = 0.0;
    let index = Arc::new(ScriptedIndex::new(&[Step::Empty], &[Step::Hit(0.2)]));
    let (controller, _) = controller(&config, index);

    let report = controller.retrieve("journal").await.unwrap();

    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Exhausted);
    assert_eq!(report.strategy_id, "keyword");
    assert_eq!(report.status, RequestStatus::Accepted);
}

#[tokio::test]
async fn test_blank_query_is_invalid() {
    let config = config(3, &[]);
    let (controller, _) = controller(&config, Arc::new(ScriptedIndex::default()));

    assert!(matches!(
        controller.retrieve("  ").await,
        Err(RetrievalError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_timeout_counts_as_unavailable() {
    let mut config = config(1, &[]);
    config.controller.retrieval_timeout_ms = 20;
    config.strategies = vec![StrategySpec::new("vector")];
    let index = Arc::new(
        ScriptedIndex::new(&[Step::Hit(0.9)], &[]).with_delay(Duration::from_millis(500)),
    );
    let learning = Arc::new(LearningStore::in_memory(["vector"], config.learning.clone()));
    let controller = AdaptiveController::new(
        &config,
        index,
        Arc::new(HashingProvider::new()),
        learning,
    )
    .unwrap();

    let result = controller.retrieve("disk full").await;
    assert!(matches!(
        result,
        Err(RetrievalError::NoCandidates { attempts: 1 })
    ));
}

#[tokio::test]
async fn test_repeated_bad_scores_demote_strategy() {
    let config = config(1, &[("vector", 0.8), ("keyword", 0.5)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.05)], &[Step::Hit(0.6)]));
    let (controller, learning) = controller(&config, index);

    let mut leaders = Vec::new();
    for _ in 0..6 {
        let report = controller.retrieve("write conflict").await.unwrap();
        leaders.push(report.ranking.ids()[0].to_string());
    }

    assert_eq!(leaders.first().unwrap(), "vector");
    assert_eq!(leaders.last().unwrap(), "keyword");

    let vector_scores: Vec<f64> = learning
        .history()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.strategy_id == "vector")
        .map(|r| r.score)
        .collect();
    assert_eq!(vector_scores.len(), 6);
    for score in vector_scores {
        assert_close(score, 0.05);
    }
    assert!(learning.current_weights().await["vector"] < 0.2);
}

#[tokio::test]
async fn test_concurrent_requests_record_every_outcome() {
    let config = config(1, &[("vector", 0.9)]);
    let index = Arc::new(ScriptedIndex::new(&[Step::Hit(0.9)], &[Step::Hit(0.9)]));
    let (controller, learning) = controller(&config, index);
    let controller = Arc::new(controller);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.retrieve(&format!("query {i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = learning.history().await.unwrap();
    assert_eq!(history.len(), 8);
    assert_eq!(learning.weight("vector").await.unwrap().count, 8);
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

async fn corpus_controller(state_dir: &std::path::Path) -> AdaptiveController {
    let embedder = Arc::new(HashingProvider::new());
    let documents = CorpusStore::new(fixtures_dir().join("corpus.json"))
        .load()
        .await
        .unwrap();
    let mut index = MemoryIndex::from_documents(documents).unwrap();
    index.ensure_embeddings(embedder.as_ref()).await.unwrap();

    let config = AdaptiveConfig::default()
        .with_learning(LearningConfig::default().with_state_dir(state_dir));
    AdaptiveController::open(&config, Arc::new(index), embedder)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_identical_state_gives_identical_trace() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();

    let mut traces = Vec::new();
    for dir in [&first_dir, &second_dir] {
        let controller = corpus_controller(dir.path()).await;
        let report = controller
            .retrieve("connection pool exhausted")
            .await
            .unwrap();
        let steps: Vec<(String, String, Option<f64>, AttemptOutcome, Vec<String>)> = report
            .attempts
            .iter()
            .map(|a| {
                (
                    a.strategy_id.clone(),
                    a.query.text().to_string(),
                    a.aggregate_score(),
                    a.outcome,
                    a.candidates.iter().map(|c| c.source_id.clone()).collect(),
                )
            })
            .collect();
        traces.push((steps, controller.learning().current_weights().await));
    }

    assert_eq!(traces[0], traces[1]);
}

#[tokio::test]
async fn test_corpus_request_finds_runbook_and_persists() {
    let state_dir = TempDir::new().unwrap();

    let report = {
        let controller = corpus_controller(state_dir.path()).await;
        controller
            .retrieve("connection pool exhausted")
            .await
            .unwrap()
    };

    assert!(
        report
            .answer
            .iter()
            .any(|c| c.source_id == "mongo/pool-exhausted")
    );
    assert!(!report.outcomes.is_empty());
    assert!(report.to_string().contains("mongo/pool-exhausted"));
    assert!(state_dir.path().join("outcomes.jsonl").exists());

    let top = &report.answer[0];
    let summary = report.summary.clone().unwrap();
    let metadata = top.metadata.clone().unwrap();
    assert_eq!(summary.source_id, top.source_id);
    assert_eq!(summary.component, metadata["component"].as_str().unwrap());
    assert_eq!(summary.error_code, metadata["error_code"].as_str().unwrap());

    let reopened = corpus_controller(state_dir.path()).await;
    let history = reopened.learning().history().await.unwrap();
    assert_eq!(history.len(), report.outcomes.len());
    assert_eq!(history[0].request_id, Some(report.request_id));

    let logged = reopened.attempt_log().unwrap().read_all().await.unwrap();
    assert_eq!(logged.len(), report.attempts.len());
    assert!(state_dir.path().join("attempts.jsonl").exists());
}
