//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary against a throwaway data directory and
//! verify its JSON output.

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_pomosync-cli"))
        .args(args)
        .env("POMOSYNC_DATA_DIR", data_dir)
        .env_remove("POMOSYNC_ENV")
        .env_remove("POMOSYNC_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_timer_status_defaults() {
    let dir = TempDir::new().unwrap();
    let view = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(view["source"], "solo");
    assert_eq!(view["mode"], "pomodoro");
    assert_eq!(view["remaining_secs"], 1500);
    assert_eq!(view["clock"], "25:00");
    assert_eq!(view["running"], false);
}

#[test]
fn test_timer_toggle_persists_between_runs() {
    let dir = TempDir::new().unwrap();
    let view = run_json(dir.path(), &["timer", "toggle"]);
    assert_eq!(view["running"], true);

    let view = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(view["running"], true);

    let view = run_json(dir.path(), &["timer", "toggle"]);
    assert_eq!(view["running"], false);
}

#[test]
fn test_timer_mode_switch() {
    let dir = TempDir::new().unwrap();
    let view = run_json(dir.path(), &["timer", "mode", "short"]);
    assert_eq!(view["mode"], "short");
    assert_eq!(view["remaining_secs"], 300);

    let (_, stderr, code) = run_cli(dir.path(), &["timer", "mode", "nap"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_timer_settings() {
    let dir = TempDir::new().unwrap();
    let view = run_json(dir.path(), &["timer", "settings", "--set", "pomodoro=50"]);
    assert_eq!(view["remaining_secs"], 3000);
    assert_eq!(view["modes"]["pomodoro"]["time"], 3000);

    let (_, _, code) = run_cli(dir.path(), &["timer", "settings", "--set", "short=0"]);
    assert_eq!(code, 1);

    let (_, stderr, code) =
        run_cli(dir.path(), &["timer", "settings", "--set", "pomodoro=999999999999999"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("maximum"), "{stderr}");
    let view = run_json(dir.path(), &["timer", "toggle"]);
    assert_eq!(view["running"], true);

    let view = run_json(dir.path(), &["timer", "settings"]);
    assert_eq!(view["modes"]["pomodoro"]["time"], 3000);
    assert_eq!(view["running"], true);
}

#[test]
fn test_session_create_join_and_toggle() {
    let dir = TempDir::new().unwrap();
    let created = run_json(dir.path(), &["session", "create", "--mode", "short"]);
    let code = created["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert_eq!(created["view"]["is_host"], true);
    assert_eq!(created["view"]["mode"], "short");

    let view = run_json(dir.path(), &["session", "toggle", &code.to_lowercase()]);
    assert_eq!(view["running"], true);
    assert_eq!(view["session_id"], code.as_str());

    let shown = run_json(dir.path(), &["session", "show", &code]);
    assert_eq!(shown["record"]["status"], "running");
    assert!(shown["record"]["end_time"].is_string());
}

#[test]
fn test_session_unknown_code_fails() {
    let dir = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["session", "toggle", "NOPE00"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Session not found"));
}

#[test]
fn test_stats_today_starts_empty() {
    let dir = TempDir::new().unwrap();
    let stats = run_json(dir.path(), &["stats", "today"]);
    assert_eq!(stats["solo"], 0);
    assert_eq!(stats["group"], 0);
}

#[test]
fn test_config_get_set_reset() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "engine.snap_tolerance_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "1");

    let (_, _, code) = run_cli(dir.path(), &["config", "set", "engine.solo_clock", "tick"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(dir.path(), &["config", "get", "engine.solo_clock"]);
    assert_eq!(stdout.trim(), "tick");

    let (_, _, code) = run_cli(dir.path(), &["config", "set", "engine.bogus", "1"]);
    assert_eq!(code, 1);

    let (_, _, code) = run_cli(dir.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let list = run_json(dir.path(), &["config", "list"]);
    assert_eq!(list["engine"]["solo_clock"], "deadline");
}

#[test]
fn test_timer_settings_from_json() {
    let dir = TempDir::new().unwrap();
    let view = run_json(
        dir.path(),
        &[
            "timer",
            "settings",
            "--json",
            r#"{"work":{"label":"Work","time":600},"rest":{"time":120}}"#,
        ],
    );
    assert_eq!(view["mode"], "work");
    assert_eq!(view["remaining_secs"], 600);
    assert_eq!(view["modes"]["rest"]["label"], "rest");

    let (_, _, code) = run_cli(dir.path(), &["timer", "settings", "--json", r#"{"work":{}}"#]);
    assert_eq!(code, 1);
}
