#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn json_stdout(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("penumbra")
        .args(args)
        .env_remove("PENUMBRA_CONFIG")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn chain_reports_the_loaded_neighbourhood() {
    let report = json_stdout(&["--format", "json", "chain"]);
    assert_eq!(report["depth"], 2);
    assert_eq!(report["nodes"], 5);
    assert_eq!(report["relationships"], 4);

    let loaded = report["loaded"].as_array().expect("loaded array");
    let names: Vec<&str> = loaded
        .iter()
        .map(|s| s["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, ["A", "B", "C", "D"]);
    assert_eq!(loaded[2]["previous"], serde_json::json!(["B", "D"]));
    assert_eq!(loaded[3]["next"], serde_json::json!(["C"]));
    assert!(report["statements"].as_array().expect("statements").is_empty());
}

#[test]
fn chain_depth_zero_loads_only_the_root() {
    let report = json_stdout(&["--format", "json", "chain", "--depth", "0", "--statements"]);
    let loaded = report["loaded"].as_array().expect("loaded array");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0]["name"], "B");
    let statements = report["statements"].as_array().expect("statements");
    assert_eq!(statements.len(), 2);
    assert!(statements[0].as_str().expect("text").contains("CREATE"));
    assert!(statements[1].as_str().expect("text").starts_with("MATCH path"));
}

#[test]
fn chain_text_output_lists_stations() {
    let output = cargo_bin_cmd!("penumbra")
        .arg("chain")
        .env_remove("PENUMBRA_CONFIG")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.starts_with("Saved 5 nodes and 4 relationships; loaded from B at depth 2:"));
    assert!(text.contains("  C next=[] previous=[B,D]"));
    assert!(!text.contains("  E "));
}

#[test]
fn config_file_overrides_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("penumbra.toml");
    fs::write(&path, "max_depth = 8\nlog_statements = true\n").expect("write config");

    let config = json_stdout(&[
        "--config",
        path.to_str().expect("utf8 path"),
        "--format",
        "json",
        "config",
    ]);
    assert_eq!(config["max_depth"], 8);
    assert_eq!(config["log_statements"], true);
}

#[test]
fn config_path_is_read_from_the_environment() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("penumbra.toml");
    fs::write(&path, "max_depth = 3\n").expect("write config");

    let output = cargo_bin_cmd!("penumbra")
        .args(["--format", "json", "config"])
        .env("PENUMBRA_CONFIG", &path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let config: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(config["max_depth"], 3);
}

#[test]
fn chain_deeper_than_the_configured_limit_fails() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("penumbra.toml");
    fs::write(&path, "max_depth = 1\n").expect("write config");

    cargo_bin_cmd!("penumbra")
        .args(["--config", path.to_str().expect("utf8 path"), "chain"])
        .args(["--depth", "2"])
        .assert()
        .failure();
}

#[test]
fn unreadable_config_fails() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "max_depth = \"many\"\n").expect("write config");

    cargo_bin_cmd!("penumbra")
        .args(["--config", path.to_str().expect("utf8 path"), "config"])
        .assert()
        .failure();
}
