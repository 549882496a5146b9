//! Adaptive retrieval command line.
//!
//! Loads a corpus, builds an in-memory index and answers one query through
//! the adaptive controller, printing the answer and the attempt trace.
//!
//! Exit codes: 0 when a result is returned (accepted or best effort),
//! 2 when no strategy produced any candidate, 1 on any other failure.

use std::path::PathBuf;
use std::process::ExitCode;

use adaptive_retrieval::RetrievalError;
use clap::{ArgGroup, Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

mod run;

/// Answer a query with adaptive strategy selection.
#[derive(Debug, Parser)]
#[command(name = "adaptive-retrieval")]
#[command(version)]
#[command(about = "Answer a query with adaptive retrieval strategy selection")]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .multiple(true)
        .args(["corpus", "ingest"])
))]
pub struct Cli {
    /// Query words, joined with spaces.
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// JSON corpus file (array of documents).
    #[arg(long, value_name = "FILE")]
    pub corpus: Option<PathBuf>,

    /// Directory of .txt, .md and .log files to index.
    #[arg(long, value_name = "DIR")]
    pub ingest: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for learned strategy weights.
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Acceptance threshold in [0, 1].
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Candidates requested per attempt.
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Attempts per strategy.
    #[arg(long)]
    pub max_attempts: Option<usize>,

    /// Embedding provider.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hashing)]
    pub embedder: EmbedderKind,

    /// Write newly computed embeddings back into the corpus file.
    #[arg(long, requires = "corpus")]
    pub save_embeddings: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Offline feature hashing.
    Hashing,
    /// OpenAI-compatible embeddings endpoint (needs OPENAI_API_KEY).
    Openai,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1; 2 is reserved for an empty result.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for_error(&e))
        }
    }
}

fn exit_code_for_error(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<RetrievalError>() {
        Some(RetrievalError::NoCandidates { .. }) => 2,
        _ => 1,
    }
}
