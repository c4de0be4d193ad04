//! CLI Integration Tests
//!
//! These tests run the `sensorlink` binary against temporary databases and
//! config files. None of them touch a Bluetooth adapter.
//!
//! ```
//! cargo test --package sensorlink-cli --test cli_integration
//! ```

use std::path::Path;
use std::process::{Command, Output};

use sensorlink_store::Store;
use sensorlink_types::RunStats;

/// Run sensorlink with an isolated config and database.
fn run_sensorlink(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("config.toml");
    if !config.exists() {
        std::fs::write(&config, "").unwrap();
    }
    Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("--config")
        .arg(&config)
        .arg("--database")
        .arg(dir.join("data.db"))
        .args(args)
        .env_remove("SENSORLINK_DEVICE")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run sensorlink binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Database with one finished run of 1000 points at buffer size 10.
fn seed_database(dir: &Path) {
    let store = Store::open(dir.join("data.db")).unwrap();
    for ts in 0..1000 {
        store
            .add_scalar_reading("run-1", "temp", 0, ts, (ts % 10) as f64)
            .unwrap();
    }
    for ts in 0..200 {
        store
            .add_scalar_reading("run-1", "temp", 1, ts * 5, (ts % 2) as f64 * 9.0)
            .unwrap();
    }
    store
        .set_stats(
            "run-1",
            "temp",
            &RunStats {
                minimum: 0.0,
                maximum: 9.0,
                average: 4.5,
                count: 1000,
                total_duration_millis: 999,
                zoom_tiers: 1,
                zoom_level_between_tiers: 5,
            },
        )
        .unwrap();
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_sensorlink(dir.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["scan", "record", "push", "query", "runs", "completions"] {
        assert!(text.contains(command), "missing {} in help:\n{}", command, text);
    }
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_sensorlink(dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_sensorlink(dir.path(), &["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("sensorlink"));
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_query_raw_tier_csv() {
    let dir = tempfile::tempdir().unwrap();
    seed_database(dir.path());

    let output = run_sensorlink(
        dir.path(),
        &[
            "query", "--run", "run-1", "--sensor", "temp", "--start", "10", "--end", "12",
            "--format", "csv",
        ],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "timestamp,value\n10,0\n11,1\n12,2\n");
}

#[test]
fn test_query_points_picks_decimated_tier() {
    let dir = tempfile::tempdir().unwrap();
    seed_database(dir.path());

    let output = run_sensorlink(
        dir.path(),
        &[
            "query", "--run", "run-1", "--sensor", "temp", "--points", "300", "--format", "json",
        ],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["tier"], 1);
    assert_eq!(json["count"], 200);
}

#[test]
fn test_query_unknown_run_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_sensorlink(dir.path(), &["query", "--run", "nope", "--sensor", "x"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "No points at tier 0.\n");
}

// =============================================================================
// Run Management Tests
// =============================================================================

#[test]
fn test_runs_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    seed_database(dir.path());

    let output = run_sensorlink(dir.path(), &["runs", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let runs: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(runs[0]["run_id"], "run-1");
    assert_eq!(runs[0]["stats"]["count"], 1000);

    let output = run_sensorlink(dir.path(), &["delete", "--run", "run-1"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("1200 points"));

    let output = run_sensorlink(dir.path(), &["delete", "--run", "run-1"]);
    assert!(!output.status.success());
}

// =============================================================================
// Argument Validation Tests
// =============================================================================

#[test]
fn test_record_requires_device() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_sensorlink(
        dir.path(),
        &["record", "--service", "181a", "--characteristic", "2a6e"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No device specified"));
}

#[test]
fn test_bad_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "buffer_size = \"many\"\n").unwrap();
    let output = run_sensorlink(dir.path(), &["runs"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to parse config"));
}
