#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the entity-demo binary.

use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;

fn run_entity_demo(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_entity-demo"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute entity-demo")
}

fn result_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_cli_help_command() {
    let output = run_entity_demo(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    for word in ["run", "schemas", "check", "--config", "--print-config"] {
        assert!(stdout.contains(word), "help should mention {word}");
    }
}

#[test]
fn test_cli_version_command() {
    let output = run_entity_demo(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("entity-demo"));
}

#[test]
fn test_missing_config_file_is_rejected() {
    let output = run_entity_demo(&["--config", "/nonexistent/entity.yaml", "check"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("config file does not exist"));
}

#[test]
fn test_check_prints_effective_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("entity.yaml");
    std::fs::write(
        &config_path,
        "api:\n  name: shop\nentity:\n  query:\n    default_limit: 3\n    max_limit: 30\n",
    )
    .unwrap();

    let output = run_entity_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Configuration is valid"));

    let yaml = stdout.trim_start_matches("Configuration is valid");
    let parsed: Value = serde_saphyr::from_str(yaml).unwrap();
    assert_eq!(parsed["api"]["name"], "shop");
    assert_eq!(parsed["api"]["version"], "v1");
    assert_eq!(parsed["entity"]["query"]["max_limit"], 30);
}

#[test]
fn test_invalid_limits_fail_check() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("entity.yaml");
    std::fs::write(&config_path, "entity:\n  query:\n    max_limit: 0\n").unwrap();
    let output = run_entity_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    assert!(!output.status.success());
}

#[test]
fn test_schemas_lists_every_method() {
    let output = run_entity_demo(&["schemas"]);
    assert!(output.status.success());
    let doc: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["api"], "myapi");
    let methods = doc["methods"].as_array().unwrap();
    let get = methods.iter().find(|m| m["name"] == "note.get").unwrap();
    assert_eq!(get["httpMethod"], "GET");
    assert_eq!(get["request"]["fields"][0]["name"], "id");
    let list = methods.iter().find(|m| m["name"] == "note.list").unwrap();
    let response_fields: Vec<&str> = list["response"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(response_fields, ["items", "nextPageToken"]);
}

#[test]
fn test_run_replays_a_script() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("requests.jsonl");
    std::fs::write(
        &script,
        r##"# notes
{"method": "note.insert", "body": {"attr1": "b", "attr2": "1"}}
{"method": "note.insert", "body": {"attr1": "a", "attr2": "2"}}
{"method": "note.list", "body": {"order": "attr1", "limit": 1}}
{"method": "task.insert", "body": {"title": "write"}}
{"method": "task.insert", "user": "ann@example.com", "body": {"title": "write"}}
{"method": "score.insert", "user": "ann@example.com", "body": {"points": 7}}
{"method": "nope"}
"##,
    )
    .unwrap();

    let output = run_entity_demo(&["run", script.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let results = result_lines(&output);
    assert_eq!(results.len(), 7);

    assert_eq!(results[0]["status"], 200);
    assert_eq!(results[0]["contentType"], "application/json");
    assert!(results[0]["response"]["created"].is_string());
    let page = &results[2]["response"];
    assert_eq!(page["items"][0]["attr1"], "a");
    assert!(page["nextPageToken"].is_string());

    assert_eq!(results[3]["status"], 401);
    assert_eq!(results[3]["contentType"], "application/problem+json");
    assert_eq!(results[3]["problem"]["detail"], "Invalid token.");
    assert_eq!(results[4]["response"]["owner"]["email"], "ann@example.com");
    assert_eq!(results[5]["response"]["player"]["email"], "ann@example.com");
    assert_eq!(results[6]["status"], 404);
    assert_eq!(results[6]["problem"]["instance"], "nope");
}

#[test]
fn test_run_rejects_malformed_lines() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("bad.jsonl");
    std::fs::write(&script, "{\"body\": {}}\n").unwrap();
    let output = run_entity_demo(&["run", script.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("script line 1"));
}
