//! Integration tests for the replay binary.

use std::process::Command;

use tempfile::TempDir;

fn replay(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_backoff-governor"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run backoff-governor")
}

#[test]
fn replay_prints_snapshot() {
    let output = replay(&["generic", "generic", "ratelimit:5:global"]);
    assert!(output.status.success());

    let snapshot: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");

    assert_eq!(snapshot["global_outage"], true);
    assert_eq!(snapshot["request_budget_fraction"], 0.95);
    assert_eq!(snapshot["timed_out"], true);

    let categories = snapshot["categories"].as_array().unwrap();
    let generic = categories
        .iter()
        .find(|c| c["category"] == "generic")
        .unwrap();
    assert_eq!(generic["count_total"], 2);
    assert_eq!(generic["current_penalty_ms"], 120_000);
}

#[test]
fn replay_honors_config_file() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("governor.toml");
    std::fs::write(&path, "[base_timeout_ms]\nhttp = 1000\n").expect("failed to write config");

    let output = replay(&["--config", path.to_str().unwrap(), "http:503"]);
    assert!(output.status.success());

    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let http = snapshot["categories"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["category"] == "http")
        .unwrap();
    assert_eq!(http["base_timeout_ms"], 1000);
    assert_eq!(http["current_penalty_ms"], 2000);
}

#[test]
fn replay_rejects_unknown_signal() {
    let output = replay(&["meltdown"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid failure signal 'meltdown'"));
}

#[test]
fn replay_without_signals_prints_usage() {
    let output = replay(&[]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage:"));
}
