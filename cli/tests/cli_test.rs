//! End-to-end tests for the adaptive-retrieval binary.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn corpus_fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../retrieval/tests/fixtures/corpus.json")
}

fn command(state_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("adaptive-retrieval").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--state-dir")
        .arg(state_dir.path());
    cmd
}

#[test]
fn test_answers_query_from_corpus() {
    let state_dir = TempDir::new().unwrap();

    command(&state_dir)
        .arg("--corpus")
        .arg(corpus_fixture())
        .args(["connection", "pool", "exhausted"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Query: connection pool exhausted"))
        .stdout(predicate::str::contains("Attempts:"))
        .stdout(predicate::str::contains("Answer:"))
        .stdout(predicate::str::contains("Component: "))
        .stdout(predicate::str::contains("Suggested Fix: "));

    assert!(state_dir.path().join("outcomes.jsonl").exists());
    assert!(state_dir.path().join("weights.json").exists());
    assert!(state_dir.path().join("attempts.jsonl").exists());
}

#[test]
fn test_json_report() {
    let state_dir = TempDir::new().unwrap();

    let output = command(&state_dir)
        .arg("--corpus")
        .arg(corpus_fixture())
        .arg("--json")
        .arg("replica lag on secondary")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["query"]["text"], "replica lag on secondary");
    assert!(matches!(
        report["status"].as_str(),
        Some("accepted") | Some("exhausted")
    ));
    assert!(!report["answer"].as_array().unwrap().is_empty());
    assert!(!report["attempts"].as_array().unwrap().is_empty());
    assert_eq!(report["summary"]["source_id"], report["answer"][0]["source_id"]);
    assert!(report["summary"]["component"].is_string());
}

#[test]
fn test_save_embeddings_writes_back_to_corpus() {
    let state_dir = TempDir::new().unwrap();
    let corpus = state_dir.path().join("corpus.json");
    std::fs::copy(corpus_fixture(), &corpus).unwrap();

    command(&state_dir)
        .arg("--corpus")
        .arg(&corpus)
        .arg("--save-embeddings")
        .arg("disk full")
        .assert()
        .success();

    let saved: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&corpus).unwrap()).unwrap();
    assert_eq!(saved.len(), 8);
    assert!(saved.iter().all(|d| d["embedding"].is_array()));
    assert!(saved.iter().all(|d| d["embedding_model"].is_string()));
    assert_eq!(saved[0]["metadata"]["component"], "driver");
}

#[test]
fn test_save_embeddings_requires_corpus() {
    let state_dir = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();

    command(&state_dir)
        .arg("--ingest")
        .arg(docs.path())
        .arg("--save-embeddings")
        .arg("anything")
        .assert()
        .code(1);
}

#[test]
fn test_outcomes_accumulate_across_runs() {
    let state_dir = TempDir::new().unwrap();

    for _ in 0..2 {
        command(&state_dir)
            .arg("--corpus")
            .arg(corpus_fixture())
            .arg("--max-attempts")
            .arg("1")
            .arg("mongod killed by OOM")
            .assert()
            .success();
    }

    let log = std::fs::read_to_string(state_dir.path().join("outcomes.jsonl")).unwrap();
    let seqs: Vec<u64> = log
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["seq"].as_u64().unwrap())
        .collect();
    assert!(seqs.len() >= 2);
    assert_eq!(seqs, (1..=seqs.len() as u64).collect::<Vec<_>>());
}

#[test]
fn test_ingest_directory() {
    let state_dir = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    std::fs::write(
        docs.path().join("incident.md"),
        "Checkpoint stalls caused write latency spikes on the primary.",
    )
    .unwrap();
    std::fs::write(docs.path().join("notes.txt"), "Rotate TLS certificates yearly.").unwrap();

    command(&state_dir)
        .arg("--ingest")
        .arg(docs.path())
        .arg("--threshold")
        .arg("0.1")
        .args(["checkpoint", "stalls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("incident.md"));
}

#[test]
fn test_empty_corpus_exits_with_no_candidates() {
    let state_dir = TempDir::new().unwrap();
    let corpus = state_dir.path().join("empty.json");
    std::fs::write(&corpus, "[]").unwrap();

    command(&state_dir)
        .arg("--corpus")
        .arg(&corpus)
        .arg("anything")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no candidates"));

    assert!(!state_dir.path().join("outcomes.jsonl").exists());
}

#[test]
fn test_requires_a_source() {
    let state_dir = TempDir::new().unwrap();

    command(&state_dir).arg("query").assert().code(1);
}

#[test]
fn test_rejects_invalid_threshold() {
    let state_dir = TempDir::new().unwrap();

    command(&state_dir)
        .arg("--corpus")
        .arg(corpus_fixture())
        .arg("--threshold")
        .arg("1.5")
        .arg("anything")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("threshold"));
}
