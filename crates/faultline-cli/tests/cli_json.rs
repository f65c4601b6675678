use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn extract_prints_companion_text_as_json() {
    let workspace = TempDir::new().expect("workspace");
    let files = workspace.path().join("files");
    fs::create_dir_all(&files).expect("files dir");
    fs::write(files.join("t1.txt"), "inventory: 12 crates").expect("companion");

    let out = run_json(
        workspace.path(),
        &["--json", "extract", "t1", "--files", "files"],
    );
    assert_eq!(out["ext"], "txt");
    assert_eq!(out["text"], "inventory: 12 crates");
    assert!(out.get("diagnostic").is_none());
}

#[test]
fn extract_without_companion_is_empty() {
    let workspace = TempDir::new().expect("workspace");
    fs::create_dir_all(workspace.path().join("files")).expect("files dir");
    let out = run_json(
        workspace.path(),
        &["--json", "extract", "nothing", "--files", "files"],
    );
    assert_eq!(out["text"], "");
    assert!(out["path"].is_null());
}

#[test]
fn config_show_redacts_api_key() {
    let workspace = TempDir::new().expect("workspace");
    let out = run_json(workspace.path(), &["--json", "config", "show"]);
    assert_eq!(out["endpoint"]["api_key"], "***REDACTED***");
    assert_eq!(out["scheduler"]["task_retries"], 0);
    assert_eq!(out["endpoint"]["base_url"], "http://127.0.0.1:9");
}

#[test]
fn format_rewrites_submission_answers() {
    let workspace = TempDir::new().expect("workspace");
    fs::write(
        workspace.path().join("output.json"),
        r#"[
  {"task_id": "a", "submitted_answer": "The final answer is Paris. Done"},
  {"task_id": "b", "submitted_answer": "```python\nprint(1)\n```\nExplanation: fixed"},
  {"task_id": "c", "submitted_answer": "AGENT ERROR: timed out"}
]"#,
    )
    .expect("submission");

    let out = run_json(
        workspace.path(),
        &["--json", "format", "output.json", "--out", "formatted.json"],
    );
    assert_eq!(out["answers"], 3);
    assert_eq!(out["changed"], 2);

    let raw = fs::read_to_string(workspace.path().join("formatted.json")).expect("formatted");
    let answers: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(answers[0]["submitted_answer"], "Paris");
    assert_eq!(answers[1]["submitted_answer"], "print(1)");
    assert_eq!(answers[2]["submitted_answer"], "AGENT ERROR: timed out");
}

#[test]
fn analyze_with_unreachable_endpoint_records_failure_markers() {
    let workspace = TempDir::new().expect("workspace");
    fs::write(
        workspace.path().join("meta.jsonl"),
        concat!(
            r#"{"task_id":"t1","question":"What is 2+2?","steps":"1. add"}"#,
            "\n",
            r#"{"task_id":"t2","question":"","steps":""}"#,
            "\n",
        ),
    )
    .expect("metadata");

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "analyze",
            "--metadata",
            "meta.jsonl",
            "--out",
            "causal.jsonl",
            "--workers",
            "1",
        ],
    );
    assert_eq!(out["summary"]["total"], 2);
    assert_eq!(out["summary"]["failed"], 1);
    assert_eq!(out["summary"]["skipped"], 1);

    let log = fs::read_to_string(workspace.path().join("causal.jsonl")).expect("log");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: Value = serde_json::from_str(lines[0]).expect("record");
    assert_eq!(record["task_id"], "t1");
    assert!(
        record["causal_analysis"]
            .as_str()
            .is_some_and(|s| s.starts_with("[ANALYSIS FAILED: "))
    );
}

#[test]
fn analyze_reads_companions_next_to_metadata_by_default() {
    let workspace = TempDir::new().expect("workspace");
    let batch = workspace.path().join("batch");
    fs::create_dir_all(&batch).expect("batch dir");
    fs::write(
        batch.join("meta.jsonl"),
        concat!(r#"{"task_id":"t1","question":"q","steps":"1. open"}"#, "\n"),
    )
    .expect("metadata");
    fs::write(batch.join("t1.docx"), "not a zip archive").expect("companion");

    let out = run_json(
        workspace.path(),
        &["--json", "analyze", "--metadata", "batch/meta.jsonl", "--workers", "1"],
    );
    assert!(
        out["files_dir"]
            .as_str()
            .is_some_and(|dir| Path::new(dir).ends_with("batch"))
    );
    let events = fs::read_to_string(workspace.path().join(".faultline").join("observe.log"))
        .expect("observe log");
    assert!(events.contains("ExtractionDiagnostic"));
}

#[test]
fn missing_metadata_fails_with_input_error() {
    let workspace = TempDir::new().expect("workspace");
    write_settings(workspace.path());
    let output = Command::new(assert_cmd::cargo::cargo_bin!("faultline"))
        .current_dir(workspace.path())
        .args(["--json", "analyze", "--metadata", "absent.jsonl"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let err: Value = serde_json::from_slice(&output).expect("json error");
    assert_eq!(err["type"], "input");
    assert!(err["error"].as_str().is_some_and(|s| s.contains("absent.jsonl")));
}

fn write_settings(workspace: &Path) {
    let runtime = workspace.join(".faultline");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.local.json"),
        r#"{"endpoint":{"base_url":"http://127.0.0.1:9","timeout_seconds":5},"scheduler":{"task_retries":0}}"#,
    )
    .expect("settings override");
}

fn run_json(workspace: &Path, args: &[&str]) -> Value {
    write_settings(workspace);
    let output = Command::new(assert_cmd::cargo::cargo_bin!("faultline"))
        .current_dir(workspace)
        .env_remove("FAULTLINE_ENDPOINT")
        .env_remove("FAULTLINE_WORKERS")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}
