//! The adaptive control loop.
//!
//! A request walks the strategy ranking best weight first. Each strategy
//! gets up to `max_attempts` executions: an attempt scoring at or above the
//! threshold ends the request, a lower score triggers a query rewrite, and
//! an unavailable index retries the same query. When every strategy is
//! spent, the best attempt seen anywhere in the request is returned.
//!
//! ```text
//! Start -> Trying -> Scoring -> Accepted
//!            ^         |
//!            |         +-> Retrying --+
//!            +------------------------+
//!          (next strategy or Exhausted once the budget is spent)
//! ```

use std::sync::Arc;
use std::time::Instant;

use adaptive_embeddings::EmbeddingProvider;
use adaptive_index::IndexProvider;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attempt::{Attempt, AttemptOutcome};
use crate::candidate::Candidate;
use crate::config::{AdaptiveConfig, ControllerConfig};
use crate::error::{Result, RetrievalError};
use crate::executor::RetrievalExecutor;
use crate::learning::{LearningStore, Outcome, OutcomeRecord};
use crate::metrics::{AttemptLog, AttemptMetric};
use crate::query::Query;
use crate::report::{RequestStatus, RetrievalReport};
use crate::rewriter::QueryRewriter;
use crate::scorer::{Scorer, WeightedScorer};
use crate::strategy::{StrategyRanking, StrategyRegistry};
use crate::summary::AnswerSummary;

/// Control loop states for one request.
enum State {
    Start,
    Trying {
        rank: usize,
        query: Query,
        strategy_attempt: usize,
    },
    Scoring {
        rank: usize,
        query: Query,
        strategy_attempt: usize,
        candidates: Vec<Candidate>,
        started_at: DateTime<Utc>,
        clock: Instant,
    },
    Retrying {
        rank: usize,
        query: Query,
        strategy_attempt: usize,
    },
    Accepted,
    Exhausted,
}

/// Selects, scores and retries retrieval strategies for each request.
///
/// The controller holds no per-request state and may serve concurrent
/// requests; learning updates are serialized by the [`LearningStore`].
pub struct AdaptiveController {
    config: ControllerConfig,
    registry: StrategyRegistry,
    executor: RetrievalExecutor,
    scorer: Arc<dyn Scorer>,
    rewriter: QueryRewriter,
    learning: Arc<LearningStore>,
    attempt_log: Option<Arc<AttemptLog>>,
}

impl AdaptiveController {
    /// Create a controller over an existing learning store.
    pub fn new(
        config: &AdaptiveConfig,
        index: Arc<dyn IndexProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        learning: Arc<LearningStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry =
            StrategyRegistry::from_specs(&config.strategies)?.with_learning(&config.learning);
        let executor = RetrievalExecutor::new(index, embedder)
            .with_timeout(config.controller.retrieval_timeout());

        Ok(Self {
            config: config.controller.clone(),
            registry,
            executor,
            scorer: Arc::new(WeightedScorer::new(&config.scorer)),
            rewriter: QueryRewriter::new(config.rewriter.clone()),
            learning,
            attempt_log: None,
        })
    }

    /// Create a controller with a learning store and an attempt log opened
    /// in the configured state directory.
    pub async fn open(
        config: &AdaptiveConfig,
        index: Arc<dyn IndexProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let state_dir = config.learning.state_dir();
        let learning = LearningStore::open(
            &state_dir,
            config.strategies.iter().map(|s| s.id.clone()),
            config.learning.clone(),
        )
        .await?;
        let attempt_log = AttemptLog::open(&state_dir).await?;
        Ok(Self::new(config, index, embedder, Arc::new(learning))?
            .with_attempt_log(Arc::new(attempt_log)))
    }

    /// Replace the scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Log every attempt to `log`.
    pub fn with_attempt_log(mut self, log: Arc<AttemptLog>) -> Self {
        self.attempt_log = Some(log);
        self
    }

    pub fn attempt_log(&self) -> Option<&Arc<AttemptLog>> {
        self.attempt_log.as_ref()
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    /// Answer one query.
    ///
    /// Fails with [`RetrievalError::InvalidArgument`] for a blank query and
    /// with [`RetrievalError::NoCandidates`] when no strategy produced a
    /// single candidate; strategy failures are otherwise absorbed into the
    /// attempt trace.
    pub async fn retrieve(&self, text: &str) -> Result<RetrievalReport> {
        let original = Query::new(text)?;
        let request_id = Uuid::new_v4();
        let request_clock = Instant::now();

        let ranking = self.registry.list(&self.learning.current_weights().await);
        info!(
            request_id = %request_id,
            query = original.text(),
            "Starting request with ranking {:?}",
            ranking.ids()
        );

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut state = State::Start;

        let status = loop {
            state = match state {
                State::Start => State::Trying {
                    rank: 0,
                    query: original.clone(),
                    strategy_attempt: 1,
                },

                State::Trying {
                    rank,
                    query,
                    strategy_attempt,
                } => {
                    let Some(ranked) = ranking.get(rank) else {
                        break RequestStatus::Exhausted;
                    };
                    let strategy = &ranked.strategy;
                    let top_k = strategy.top_k(self.config.top_k);
                    let started_at = Utc::now();
                    let clock = Instant::now();

                    match self.executor.execute(strategy, &query, top_k).await {
                        Ok(candidates) => State::Scoring {
                            rank,
                            query,
                            strategy_attempt,
                            candidates,
                            started_at,
                            clock,
                        },
                        Err(RetrievalError::RetrievalUnavailable { reason, .. }) => {
                            warn!(
                                strategy = strategy.id(),
                                query = query.text(),
                                attempt = strategy_attempt,
                                "Retrieval unavailable: {reason}"
                            );
                            let retry = strategy_attempt < self.config.max_attempts;
                            attempts.push(Attempt {
                                sequence: attempts.len() + 1,
                                strategy_attempt,
                                strategy_id: strategy.id().to_string(),
                                query: query.clone(),
                                candidates: Vec::new(),
                                score: None,
                                error: Some(reason),
                                outcome: if retry {
                                    AttemptOutcome::Retried
                                } else {
                                    AttemptOutcome::Exhausted
                                },
                                started_at,
                                elapsed_ms: elapsed_ms(clock),
                            });
                            if retry {
                                State::Retrying {
                                    rank,
                                    query,
                                    strategy_attempt: strategy_attempt + 1,
                                }
                            } else {
                                self.advance(rank, &ranking, &original)
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }

                State::Scoring {
                    rank,
                    query,
                    strategy_attempt,
                    candidates,
                    started_at,
                    clock,
                } => {
                    let Some(ranked) = ranking.get(rank) else {
                        break RequestStatus::Exhausted;
                    };
                    let strategy = &ranked.strategy;
                    let score = self
                        .scorer
                        .score(&query, &candidates, strategy.top_k(self.config.top_k));
                    let aggregate = score.aggregate;
                    debug!(
                        strategy = strategy.id(),
                        query = query.text(),
                        attempt = strategy_attempt,
                        score = aggregate,
                        candidates = candidates.len(),
                        "Scored attempt"
                    );

                    let mut attempt = Attempt {
                        sequence: attempts.len() + 1,
                        strategy_attempt,
                        strategy_id: strategy.id().to_string(),
                        query,
                        candidates,
                        score: Some(score),
                        error: None,
                        outcome: AttemptOutcome::Accepted,
                        started_at,
                        elapsed_ms: elapsed_ms(clock),
                    };

                    if aggregate >= self.config.threshold && !attempt.candidates.is_empty() {
                        attempts.push(attempt);
                        State::Accepted
                    } else if strategy_attempt >= self.config.max_attempts {
                        attempt.outcome = AttemptOutcome::Exhausted;
                        attempts.push(attempt);
                        self.advance(rank, &ranking, &original)
                    } else {
                        let rewritten = {
                            let mut history: Vec<&Attempt> = attempts
                                .iter()
                                .filter(|a| a.strategy_id == attempt.strategy_id)
                                .collect();
                            history.push(&attempt);
                            self.rewriter.rewrite(&original, &history)
                        };
                        match rewritten {
                            Ok(next) => {
                                attempt.outcome = AttemptOutcome::Retried;
                                attempts.push(attempt);
                                State::Retrying {
                                    rank,
                                    query: next,
                                    strategy_attempt: strategy_attempt + 1,
                                }
                            }
                            Err(RetrievalError::NoRewriteAvailable) => {
                                debug!("No distinct rewrite left for strategy {}", strategy.id());
                                attempt.outcome = AttemptOutcome::Exhausted;
                                attempts.push(attempt);
                                self.advance(rank, &ranking, &original)
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }

                State::Retrying {
                    rank,
                    query,
                    strategy_attempt,
                } => {
                    debug!("Retrying attempt {strategy_attempt} with '{}'", query.text());
                    State::Trying {
                        rank,
                        query,
                        strategy_attempt,
                    }
                }

                State::Accepted => break RequestStatus::Accepted,
                State::Exhausted => break RequestStatus::Exhausted,
            };
        };

        self.log_attempts(request_id, &original, &attempts).await;

        let answer_index = match status {
            RequestStatus::Accepted => attempts.len().checked_sub(1),
            RequestStatus::Exhausted => best_attempt(&attempts),
        };
        let Some(answer_index) = answer_index else {
            warn!(
                "Request {request_id} produced no candidates after {} attempts",
                attempts.len()
            );
            return Err(RetrievalError::NoCandidates {
                attempts: attempts.len(),
            });
        };

        let outcomes = self.record_outcomes(request_id, &original, &attempts).await;
        let answer = &attempts[answer_index];

        info!(
            "Request {request_id} {status:?} via {} with score {:.3} after {} attempts",
            answer.strategy_id,
            answer.aggregate_score().unwrap_or_default(),
            attempts.len()
        );

        Ok(RetrievalReport {
            request_id,
            query: original,
            status,
            strategy_id: answer.strategy_id.clone(),
            score: answer.aggregate_score().unwrap_or_default(),
            answer_sequence: answer.sequence,
            answer: answer.candidates.clone(),
            summary: AnswerSummary::from_candidates(&answer.candidates),
            ranking,
            outcomes,
            elapsed_ms: elapsed_ms(request_clock),
            attempts,
        })
    }

    /// Move to the next strategy in the ranking, or give up.
    fn advance(&self, rank: usize, ranking: &StrategyRanking, original: &Query) -> State {
        if rank + 1 < ranking.len() {
            State::Trying {
                rank: rank + 1,
                query: original.clone(),
                strategy_attempt: 1,
            }
        } else {
            State::Exhausted
        }
    }

    /// Append the request's attempts to the attempt log, if any. Failures
    /// are logged only.
    async fn log_attempts(&self, request_id: Uuid, original: &Query, attempts: &[Attempt]) {
        let Some(log) = &self.attempt_log else {
            return;
        };
        let metrics: Vec<AttemptMetric> = attempts
            .iter()
            .map(|a| AttemptMetric::from_attempt(request_id, original, a))
            .collect();
        if let Err(e) = log.append(&metrics).await {
            warn!("Failed to log attempts for request {request_id}: {e}");
        }
    }

    /// Report each scored strategy's final score to the learning store.
    ///
    /// A persistence failure is logged and leaves the request's answer intact.
    async fn record_outcomes(
        &self,
        request_id: Uuid,
        original: &Query,
        attempts: &[Attempt],
    ) -> Vec<OutcomeRecord> {
        let outcomes = final_scores(attempts)
            .into_iter()
            .map(|(strategy_id, score)| {
                Outcome::new(strategy_id, score)
                    .with_query_hash(original.hash())
                    .with_request_id(request_id)
            })
            .collect();

        match self.learning.record_batch(outcomes).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to record outcomes for request {request_id}: {e}");
                Vec::new()
            }
        }
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Index of the highest scoring attempt with candidates. Ties go to the
/// earliest attempt.
fn best_attempt(attempts: &[Attempt]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, attempt) in attempts.iter().enumerate() {
        if !attempt.has_answer() {
            continue;
        }
        let score = attempt.aggregate_score().unwrap_or_default();
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// The last aggregate score of every strategy that was scored, in order of
/// first appearance.
fn final_scores(attempts: &[Attempt]) -> Vec<(String, f64)> {
    let mut scores: Vec<(String, f64)> = Vec::new();
    for attempt in attempts {
        let Some(score) = attempt.aggregate_score() else {
            continue;
        };
        match scores.iter_mut().find(|(id, _)| *id == attempt.strategy_id) {
            Some(entry) => entry.1 = score,
            None => scores.push((attempt.strategy_id.clone(), score)),
        }
    }
    scores
}
