use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::tempdir;

const LANDING_PAGE: &str = include_str!("fixtures/landing_page.json");

fn run_harvest(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_figma-harvest"))
        .current_dir(cwd)
        .args(args)
        .env("RUST_LOG", "off")
        .env_remove("FIGMA_TOKEN")
        .env_remove("FIGMA_ACCESS_TOKEN")
        .output()
        .expect("figma-harvest command should run")
}

fn error_envelope(output: &Output) -> Value {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find(|value| value.get("ok").is_some())
        .unwrap_or_else(|| panic!("no error envelope on stderr: {stderr}"))
}

#[test]
fn analyze_json_reports_tokens_components_and_assets() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("tree.json"), LANDING_PAGE).expect("fixture should write");

    let output = run_harvest(dir.path(), &["analyze", "--tree-file", "tree.json", "--json"]);
    assert!(
        output.status.success(),
        "analyze should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(report["nodeCount"], 8);
    assert_eq!(report["componentSummary"]["summary"]["buttonCount"], 1);
    assert_eq!(report["componentSummary"]["summary"]["navigationCount"], 1);
    assert_eq!(report["componentSummary"]["matches"]["navigation"][0], "1:2");
    assert_eq!(report["tokenSummary"]["colors"][1], "#1A73E8");
    assert_eq!(report["imageAssets"][0]["id"], "1:4");
    assert_eq!(report["imageAssets"].as_array().map(Vec::len), Some(1));
}

#[test]
fn analyze_output_is_stable_across_runs() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("tree.json"), LANDING_PAGE).expect("fixture should write");

    let first = run_harvest(dir.path(), &["analyze", "--tree-file", "tree.json", "--json"]);
    let second = run_harvest(dir.path(), &["analyze", "--tree-file", "tree.json", "--json"]);
    assert!(first.status.success() && second.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn analyze_human_output_names_the_tree() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("tree.json"), LANDING_PAGE).expect("fixture should write");

    let output = run_harvest(dir.path(), &["analyze", "--tree-file", "tree.json"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Tree: Landing Page (8 nodes)"));
    assert!(stdout.contains("1 buttons"));
    assert!(stdout.contains("Font families: Inter\n"));
    assert!(stdout.contains("1:4 (Hero image)"));
}

#[test]
fn unreadable_tree_file_is_a_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_harvest(
        dir.path(),
        &["analyze", "--tree-file", "missing.json", "--json"],
    );
    assert_eq!(output.status.code(), Some(2));
    let envelope = error_envelope(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "E_TREE_FILE");
}

#[test]
fn malformed_tree_file_is_a_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("tree.json"), "{ \"nodes\": ").expect("file should write");
    let output = run_harvest(dir.path(), &["analyze", "--tree-file", "tree.json", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(error_envelope(&output)["error"]["code"], "E_TREE_FILE");
}

#[test]
fn extract_without_token_fails_before_any_request() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_harvest(
        dir.path(),
        &[
            "extract",
            "--figma",
            "https://www.figma.com/design/ABC123xyz/Landing?node-id=1-1",
            "--output-folder",
            "out",
            "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    let envelope = error_envelope(&output);
    assert_eq!(envelope["error"]["code"], "E_MISSING_TOKEN");
    assert!(!dir.path().join("out").exists());
}

#[test]
fn extract_rejects_unparseable_targets() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_harvest(
        dir.path(),
        &[
            "extract",
            "--figma",
            "https://example.com/not/a/figma/link",
            "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(error_envelope(&output)["error"]["code"], "E_FIGMA_TARGET");

    let output = run_harvest(dir.path(), &["extract", "--figma", "ABC123xyz", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let envelope = error_envelope(&output);
    assert_eq!(envelope["error"]["code"], "E_FIGMA_TARGET");
    assert!(envelope["error"]["message"]
        .as_str()
        .is_some_and(|message| message.contains("node id")));
}
