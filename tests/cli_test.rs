use assert_fs::prelude::*;
use predicates::prelude::*;

const STORE: &str = r#"{"_id":"Isaac Newton","type":"Person","attributes":{"field":["physics"]},"relationships":{"target_ids":["Albert Einstein","Principia"],"types":["inspired","wrote"],"attributes":[{},{}]}}
{"_id":"Albert Einstein","type":"Person","attributes":{},"relationships":{"target_ids":["Ulm"],"types":["born_in"],"attributes":[{}]}}
{"_id":"Ulm","type":"Place"}
"#;

async fn run(args: &[&str]) -> std::process::Output {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_graphrag_builder"))
        .args(args)
        .env("LOG_LEVEL", "warn")
        .output()
        .await
        .unwrap()
}

fn prepared_store() -> (assert_fs::TempDir, String) {
    let temp = assert_fs::TempDir::new().unwrap();
    let store = temp.child("graph.jsonl");
    store.write_str(STORE).unwrap();
    let path = store.path().to_str().unwrap().to_string();
    (temp, path)
}

#[tokio::test]
async fn test_stats_counts_records() {
    let (_temp, store) = prepared_store();

    let output = run(&["stats", "--store", &store]).await;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("entities: 3"));
    assert!(stdout.contains("relationships: 3"));
}

#[tokio::test]
async fn test_export_dot_to_file() {
    let (temp, store) = prepared_store();
    let out = temp.child("graph.dot");

    let output = run(&[
        "export",
        "--store",
        &store,
        "--format",
        "dot",
        "--output",
        out.path().to_str().unwrap(),
    ])
    .await;
    assert!(output.status.success());

    out.assert(predicate::path::exists());
    out.assert(predicate::str::starts_with("digraph {"));
    out.assert(predicate::str::contains("\"Principia\""));
}

#[tokio::test]
async fn test_export_focus_limits_depth() {
    let (_temp, store) = prepared_store();

    let output = run(&[
        "export", "--store", &store, "--format", "jsonl", "--focus", "Ulm", "--depth", "1",
    ])
    .await;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let ids: Vec<&str> = stdout.lines().collect();
    assert_eq!(ids.len(), 2);
    assert!(stdout.contains(r#""_id":"Ulm""#));
    assert!(stdout.contains(r#""_id":"Albert Einstein""#));
    assert!(!stdout.contains(r#""_id":"Isaac Newton""#));
}

#[tokio::test]
async fn test_export_unknown_focus_fails() {
    let (_temp, store) = prepared_store();

    let output = run(&["export", "--store", &store, "--focus", "Ada Lovelace"]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Ada Lovelace"));
}

#[tokio::test]
async fn test_corrupt_store_is_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let store = temp.child("graph.jsonl");
    store
        .write_str(r#"{"_id":"A","relationships":{"target_ids":["B"],"types":[],"attributes":[]}}"#)
        .unwrap();

    let output = run(&["stats", "--store", store.path().to_str().unwrap()]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sequence lengths differ"));
}

#[tokio::test]
async fn test_export_focus_dot_draws_only_traversed_edges() {
    let (_temp, store) = prepared_store();

    let output = run(&[
        "export",
        "--store",
        &store,
        "--format",
        "dot",
        "--focus",
        "Albert Einstein",
        "--depth",
        "0",
    ])
    .await;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"Albert Einstein\""));
    assert!(!stdout.contains("Ulm"));
    assert!(!stdout.contains("born_in"));
}

#[tokio::test]
async fn test_ask_with_unreachable_model_degrades() {
    let (_temp, store) = prepared_store();

    // Nothing listens on the discard port, so the model call is refused
    let output = run(&[
        "ask",
        "--store",
        &store,
        "--endpoint",
        "http://127.0.0.1:9",
        "Where was Albert Einstein born?",
    ])
    .await;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("The question could not be answered right now"));
}
