//! CLI integration tests for ekb

mod common;

use serde_json::{Value, json};
use std::path::Path;
use std::process::Command;

/// Helper to run the CLI
fn run_cli(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ekb"))
        .args(args)
        .output()
        .expect("Failed to execute ekb CLI");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn root_arg(root: &Path) -> String {
    root.to_string_lossy().to_string()
}

fn query(root: &str, args: &[&str]) -> Value {
    let mut full = vec!["--root", root, "query"];
    full.extend_from_slice(args);
    let (stdout, stderr, success) = run_cli(&full);
    assert!(success, "query {:?} should succeed: {}", args, stderr);
    serde_json::from_str(&stdout).expect("query output is JSON")
}

#[test]
fn test_help_command() {
    let (stdout, _, success) = run_cli(&["--help"]);
    assert!(success, "Help command should succeed");
    assert!(stdout.contains("ekb"), "Should mention ekb");
    assert!(stdout.contains("update"), "Should mention update command");
    assert!(stdout.contains("query"), "Should mention query command");
}

#[test]
fn test_version_command() {
    let (stdout, _, success) = run_cli(&["--version"]);
    assert!(success, "Version command should succeed");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "Should show version");
}

#[test]
fn test_all_then_status() {
    let temp = common::copy_fixture();
    let root = root_arg(temp.path());

    let (stdout, stderr, success) = run_cli(&["--root", &root, "--json", "all"]);
    assert!(success, "all should succeed: {}", stderr);
    let output: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(output["type"], json!("Stages"));
    assert_eq!(output["summaries"].as_array().map(Vec::len), Some(4));

    let (stdout, stderr, success) = run_cli(&["--root", &root, "status"]);
    assert!(success, "status should succeed: {}", stderr);
    assert!(stdout.contains("Units: 4"), "status lists units: {}", stdout);
    assert!(stdout.contains("build: completed"), "status shows markers: {}", stdout);
}

#[test]
fn test_query_commands() {
    let temp = common::copy_fixture();
    let root = root_arg(temp.path());
    let (_, stderr, success) = run_cli(&["--root", &root, "all"]);
    assert!(success, "all should succeed: {}", stderr);

    assert_eq!(
        query(&root, &["dependents", "Core"]),
        json!(["CoreUObject", "Engine", "UnrealEd"])
    );
    assert_eq!(
        query(&root, &["lookup", "Foo"]),
        json!({"error": "not found: Foo", "fallback_command": "fuzzy_search Foo"})
    );

    let actor = query(&root, &["--detail", "details", "lookup", "type:AActor"]);
    assert_eq!(actor["parent"], json!("UObject"));
    assert_eq!(actor["source_ref"], json!("src:type:AActor"));

    let source = query(&root, &["source", "src:type:AActor"]);
    assert!(source["source"].as_str().unwrap_or_default().contains("class ENGINE_API AActor"));
}

#[test]
fn test_masked_reference_expands_in_later_invocation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let header: String = (0..12)
        .map(|i| format!("struct FGizmo{i:02} {{ int32 Value; }};\n"))
        .collect();
    common::write_files(
        temp.path(),
        &[
            ("Source/Runtime/Tools/Tools.Build.cs", common::build_cs("Tools", &[]).as_str()),
            ("Source/Runtime/Tools/Public/Gizmos.h", header.as_str()),
        ],
    );
    let root = root_arg(temp.path());
    let (_, stderr, success) = run_cli(&["--root", &root, "all"]);
    assert!(success, "all should succeed: {}", stderr);

    let masked = query(&root, &["fuzzy_search", "Gizmo"]);
    assert_eq!(masked["total"], json!(12));
    let ref_id = masked["ref_id"].as_str().expect("ref id");

    let full = query(&root, &["expand", ref_id]);
    assert_eq!(full.as_array().map(Vec::len), Some(12));
}

#[test]
fn test_query_without_store_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = root_arg(temp.path());
    let (_, stderr, success) = run_cli(&["--root", &root, "--json", "query", "lookup", "AActor"]);
    assert!(!success, "query without a store should fail");
    assert!(stderr.contains("\"error\""), "error is reported as JSON: {}", stderr);
}

#[test]
fn test_unknown_stage_fails() {
    let temp = common::copy_fixture();
    let root = root_arg(temp.path());
    let (_, stderr, success) = run_cli(&["--root", &root, "run", "serve"]);
    assert!(!success, "unknown stage should fail");
    assert!(stderr.contains("unknown stage"), "stderr: {}", stderr);
}

#[test]
fn test_partitioned_run_and_status() {
    let temp = common::copy_fixture();
    let root = root_arg(temp.path());
    let (_, stderr, success) = run_cli(&["--root", &root, "run", "discover"]);
    assert!(success, "discover should succeed: {}", stderr);

    let (stdout, stderr, success) = run_cli(&[
        "--root", &root, "--json", "run", "extract", "--partition", "Editor",
    ]);
    assert!(success, "partitioned extract should succeed: {}", stderr);
    let output: Value = serde_json::from_str(&stdout).expect("json output");
    let summary = &output["summaries"][0];
    assert_eq!(summary["partition"], json!("Editor"));
    assert_eq!(summary["total"], json!(1));
    assert_eq!(summary["counts"]["partition.Editor"], json!(1));

    let (stdout, stderr, success) =
        run_cli(&["--root", &root, "--json", "status", "--partition", "Editor"]);
    assert!(success, "status should succeed: {}", stderr);
    let output: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(output["status"]["stages"]["extract"]["status"], json!("pending"));
    assert_eq!(
        output["status"]["partitions"]["Editor"],
        json!({"units": 1, "completed": {"extract": 1, "symbols": 0, "build": 0}})
    );

    let (_, stderr, success) =
        run_cli(&["--root", &root, "run", "build", "--partition", "Editor"]);
    assert!(!success, "build cannot run on a partition");
    assert!(stderr.contains("cannot run on a partition"), "{}", stderr);
}
