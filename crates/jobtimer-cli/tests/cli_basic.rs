//! Basic CLI E2E tests.
//!
//! Each test runs the binary against its own data directory.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_jobtimer-cli"))
        .args(args)
        .env("JOBTIMER_HOME", home)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, code) = run_cli(home, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

fn init_timer(home: &Path) -> String {
    let out = run_json(
        home,
        &[
            "timer", "init", "--user", "u1", "--project", "p1", "--job-card", "jc1", "--title",
            "Panel wiring", "--hours", "2", "--start",
        ],
    );
    out["id"].as_str().unwrap().to_string()
}

#[test]
fn test_timer_lifecycle() {
    let home = TempDir::new().unwrap();
    let id = init_timer(home.path());
    assert!(id.starts_with("timer_u1_p1_"));

    let status = run_json(home.path(), &["timer", "status", &id]);
    assert_eq!(status["status"], "running");
    assert_eq!(status["timer"]["syncVersion"], 1);
    assert_eq!(status["timer"]["timeRemaining"], 7200);

    let paused = run_json(home.path(), &["timer", "pause", &id, "--reason", "break"]);
    assert_eq!(paused["committed"], true);
    assert_eq!(paused["timer"]["syncVersion"], 2);
    assert_eq!(paused["timer"]["pauseCount"], 1);

    let resumed = run_json(home.path(), &["timer", "resume", &id]);
    assert_eq!(resumed["timer"]["isRunning"], true);
    assert_eq!(resumed["timer"]["syncVersion"], 3);

    let done = run_json(home.path(), &["timer", "complete", &id, "--notes", "shipped"]);
    assert_eq!(done["completed"], true);

    let (_, stderr, code) = run_cli(home.path(), &["timer", "status", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("timer not found"));
}

#[test]
fn test_init_key_is_honoured_across_invocations() {
    let home = TempDir::new().unwrap();
    let args = [
        "timer", "init", "--user", "u1", "--project", "p1", "--job-card", "jc1", "--hours",
        "1", "--key", "req-7",
    ];
    let first = run_json(home.path(), &args);
    let second = run_json(home.path(), &args);
    assert_eq!(first["id"], second["id"]);

    let listed = run_json(home.path(), &["timer", "list", "--user", "u1"]);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[test]
fn test_timer_update_and_list() {
    let home = TempDir::new().unwrap();
    let id = init_timer(home.path());

    let updated = run_json(home.path(), &["timer", "update", &id, "--remaining", "7000"]);
    assert_eq!(updated["committed"], true);
    assert_eq!(updated["timer"]["timeRemaining"], 7000);

    let checked = run_json(
        home.path(),
        &["timer", "update", &id, "--remaining", "6990", "--checked"],
    );
    assert_eq!(checked["committed"], true);
    assert_eq!(checked["timer"]["syncVersion"], 3);

    let list = run_json(home.path(), &["timer", "list", "--user", "u1"]);
    assert_eq!(list.as_array().unwrap().len(), 1);
    let empty = run_json(home.path(), &["timer", "list", "--user", "nobody"]);
    assert!(empty.as_array().unwrap().is_empty());
}

#[test]
fn test_pause_twice_is_rejected() {
    let home = TempDir::new().unwrap();
    let id = init_timer(home.path());
    run_json(home.path(), &["timer", "pause", &id]);

    let (_, stderr, code) = run_cli(home.path(), &["timer", "pause", &id]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_sync_status_empty() {
    let home = TempDir::new().unwrap();
    let status = run_json(home.path(), &["sync", "status"]);
    assert_eq!(status["pendingRetries"], 0);

    let retry = run_json(home.path(), &["sync", "retry"]);
    assert_eq!(retry["report"]["succeeded"].as_array().unwrap().len(), 0);
}

#[test]
fn test_config_get_set() {
    let home = TempDir::new().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "sync.max_retries"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "3");

    let (_, _, code) = run_cli(home.path(), &["config", "set", "sync.strategy", "merge"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "sync.strategy"]);
    assert_eq!(stdout.trim(), "merge");

    let (_, _, code) = run_cli(home.path(), &["config", "get", "sync.nope"]);
    assert_eq!(code, 1);

    let (_, _, code) = run_cli(home.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "sync.strategy"]);
    assert_eq!(stdout.trim(), "last_write_wins");
}

#[test]
fn test_config_policy_reflects_settings() {
    let home = TempDir::new().unwrap();
    let policy = run_json(home.path(), &["config", "policy"]);
    assert_eq!(policy["strategy"], "last_write_wins");
    assert_eq!(policy["drift_threshold_secs"], 60);
    assert_eq!(policy["max_retries"], 3);

    let set = run_json(home.path(), &["config", "set", "sync.drift_threshold_secs", "120"]);
    assert_eq!(set["value"], "120");
    let policy = run_json(home.path(), &["config", "policy"]);
    assert_eq!(policy["drift_threshold_secs"], 120);
}

#[test]
fn test_prefs_show_and_set() {
    let home = TempDir::new().unwrap();
    let prefs = run_json(home.path(), &["prefs", "show"]);
    assert_eq!(prefs["audioAlerts"], true);

    let prefs = run_json(home.path(), &["prefs", "set", "audio_alerts", "false"]);
    assert_eq!(prefs["audioAlerts"], false);
    assert!(home
        .path()
        .join("timer-notification-preferences.json")
        .exists());

    let prefs = run_json(home.path(), &["prefs", "show"]);
    assert_eq!(prefs["audioAlerts"], false);
    assert_eq!(prefs["visualIndicators"], true);
}
