//! # Adaptive Retrieval
//!
//! A control loop that picks a retrieval strategy, judges the candidates it
//! returns, rewrites the query or falls back to another strategy when the
//! result is weak, and learns which strategies tend to work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     AdaptiveController                       │
//! │                                                              │
//! │  StrategyRegistry ──list(weights)──▶ ranking                 │
//! │          │                                                   │
//! │          ▼                                                   │
//! │  RetrievalExecutor ──▶ Scorer ──▶ accept? ──▶ report         │
//! │          ▲                           │                       │
//! │          └────── QueryRewriter ◀─────┘ no                    │
//! │                                                              │
//! │  LearningStore ◀── one outcome per scored strategy           │
//! │  AttemptLog    ◀── one metric per attempt                    │
//! └──────────────────────────────────────────────────────────────┘
//!            │                         │
//!            ▼                         ▼
//!     IndexProvider             EmbeddingProvider
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use adaptive_retrieval::{AdaptiveConfig, AdaptiveController};
//!
//! let controller = AdaptiveController::open(&config, index, embedder).await?;
//! let report = controller.retrieve("why is the database slow").await?;
//! println!("{report}");
//! ```

pub mod attempt;
pub mod candidate;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod learning;
pub mod metrics;
pub mod query;
pub mod report;
pub mod rewriter;
pub mod scorer;
pub mod strategy;
pub mod summary;

pub use attempt::{Attempt, AttemptOutcome};
pub use candidate::{Candidate, RelevanceSignal};
pub use config::{
    AdaptiveConfig, ControllerConfig, FlushPolicy, LearningConfig, RewriterConfig, ScorerConfig,
    StrategySpec,
};
pub use controller::AdaptiveController;
pub use error::{Result, RetrievalError};
pub use executor::RetrievalExecutor;
pub use learning::{LearningStore, Outcome, OutcomeRecord, StrategyWeight};
pub use metrics::{AttemptLog, AttemptMetric};
pub use query::{Query, QueryHash};
pub use report::{RequestStatus, RetrievalReport};
pub use rewriter::{QueryRewriter, RewriteKind};
pub use scorer::{CandidateScore, ScoreBreakdown, Scorer, WeightedScorer};
pub use strategy::{RankedStrategy, Strategy, StrategyKind, StrategyRanking, StrategyRegistry};
pub use summary::AnswerSummary;
