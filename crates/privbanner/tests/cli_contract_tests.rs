//! CLI command contract tests
//!
//! Runs the `privbanner` binary against a temp data directory and checks:
//! - Deterministic exit codes
//! - Stable JSON shape in `--format json` mode
//! - No ANSI escapes in plain mode
//! - Actionable error messages for failure paths
//! - The show count persists across invocations (one invocation = one session)

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SHOWN_PREF: &str = "browser.search.separatePrivateDefault.ui.banner.shown";
const ENABLED_PREF: &str = "browser.search.separatePrivateDefault.ui.enabled";

// =============================================================================
// Fixture helpers
// =============================================================================

/// Temp dir holding `privbanner.toml` and a data directory for the given
/// backend. Returns the guard and the config path.
fn setup_with_backend(backend: &str) -> (TempDir, String) {
    let dir = TempDir::new().expect("create temp dir");
    let data_dir = dir.path().join("data");
    let config_path = dir.path().join("privbanner.toml");
    let config = format!(
        "[general]\nlog_level = \"warn\"\ndata_dir = '{}'\n\n[prefs]\nbackend = \"{backend}\"\n",
        data_dir.display()
    );
    std::fs::write(&config_path, config).expect("write config");
    let path = config_path.to_string_lossy().to_string();
    (dir, path)
}

fn setup() -> (TempDir, String) {
    setup_with_backend("file")
}

#[allow(deprecated)]
fn cmd_for(config: &str) -> Command {
    let mut cmd = Command::cargo_bin("privbanner").expect("privbanner binary should be built");
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("PRIVBANNER_CONFIG");
    cmd.args(["--config", config]);
    cmd
}

fn run_json(config: &str, args: &[&str]) -> serde_json::Value {
    let output = cmd_for(config)
        .args(["--format", "json"])
        .args(args)
        .output()
        .expect("run privbanner");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn assert_no_ansi(output: &str, context: &str) {
    assert!(
        !output.contains("\x1b["),
        "{context}: output should not contain ANSI escapes, got:\n{output}"
    );
}

// =============================================================================
// status
// =============================================================================

#[test]
fn contract_status_fresh_plain() {
    let (_dir, config) = setup();
    let output = cmd_for(&config).arg("status").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_no_ansi(&stdout, "status plain");
    assert!(stdout.contains("enabled:            false"));
    assert!(stdout.contains("show count:         0/5"));
    assert!(stdout.contains("decision:           feature disabled"));
}

#[test]
fn contract_status_json_schema() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();

    let json = run_json(&config, &["status"]);
    let status = &json["status"];
    assert_eq!(status["enabled"], true);
    assert_eq!(status["show_count"], 0);
    assert_eq!(status["max_show_count"], 5);
    assert_eq!(status["shown_this_session"], false);
    assert_eq!(status["suppressed"], false);
    assert!(status["pending_write"].is_null());
    assert_eq!(status["decision"], "show");
    assert_eq!(json["shown_pref"], SHOWN_PREF);
    assert_eq!(json["backend"], "file");
}

// =============================================================================
// load
// =============================================================================

#[test]
fn contract_load_disabled_stays_hidden() {
    let (_dir, config) = setup();
    cmd_for(&config)
        .arg("load")
        .assert()
        .success()
        .stdout(predicate::str::contains("load 1: hidden (count 0/5)"));
}

#[test]
fn contract_load_once_per_session() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();

    cmd_for(&config)
        .args(["load", "--times", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("load 1: shown (count 1/5)"))
        .stdout(predicate::str::contains("load 2: hidden (count 1/5)"));

    // Next invocation is a new session.
    cmd_for(&config)
        .arg("load")
        .assert()
        .success()
        .stdout(predicate::str::contains("load 1: shown (count 2/5)"));
}

#[test]
fn contract_load_new_sessions_hit_cap() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();

    let json = run_json(&config, &["load", "--times", "7", "--new-session"]);
    let visibility: Vec<&str> = json["loads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["visibility"].as_str().unwrap())
        .collect();
    assert_eq!(
        visibility,
        ["shown", "shown", "shown", "shown", "shown", "hidden", "hidden"]
    );
    assert_eq!(json["status"]["show_count"], 5);
    assert_eq!(json["status"]["decision"], "cap_reached");

    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e["method"] == "shown"));
}

// =============================================================================
// close / open-settings
// =============================================================================

#[test]
fn contract_close_pins_count() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();
    cmd_for(&config).arg("load").assert().success();

    cmd_for(&config)
        .arg("close")
        .assert()
        .success()
        .stdout(predicate::str::contains("show count pinned at 5"));

    let json = run_json(&config, &["status"]);
    assert_eq!(json["status"]["show_count"], 5);
    assert_eq!(json["status"]["suppressed"], true);

    cmd_for(&config)
        .arg("load")
        .assert()
        .success()
        .stdout(predicate::str::contains("load 1: hidden"));
}

#[test]
fn contract_open_settings_json() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();

    let json = run_json(&config, &["open-settings"]);
    assert_eq!(json["action"], "open_settings");
    assert_eq!(json["show_count"], 5);
    assert_eq!(json["url"], "about:preferences#search");
    assert_eq!(json["events"][0]["method"], "open_settings");
}

// =============================================================================
// pref tooling
// =============================================================================

#[test]
fn contract_set_count_clamps() {
    let (_dir, config) = setup();
    cmd_for(&config)
        .args(["set-count", "99"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{SHOWN_PREF} = 5")));

    cmd_for(&config)
        .args(["set-count", "-4"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{SHOWN_PREF} = 0")));
}

#[test]
fn contract_pref_writes_json_values_are_typed() {
    let (_dir, config) = setup();
    let json = run_json(&config, &["set-count", "3"]);
    assert_eq!(json["key"], SHOWN_PREF);
    assert_eq!(json["value"], 3);

    let json = run_json(&config, &["set-count", "-2"]);
    assert_eq!(json["value"], 0);

    let json = run_json(&config, &["enable"]);
    assert_eq!(json["key"], ENABLED_PREF);
    assert_eq!(json["value"], true);
}

#[test]
fn contract_reset_and_prefs() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();
    cmd_for(&config).args(["set-count", "3"]).assert().success();

    let prefs = run_json(&config, &["prefs"]);
    assert_eq!(prefs[ENABLED_PREF], true);
    assert_eq!(prefs[SHOWN_PREF], 3);

    cmd_for(&config).arg("reset").assert().success();
    let prefs = run_json(&config, &["prefs"]);
    assert!(prefs.get(SHOWN_PREF).is_none());
    assert_eq!(prefs[ENABLED_PREF], true);
}

#[test]
fn contract_prefs_empty_plain() {
    let (_dir, config) = setup();
    cmd_for(&config)
        .arg("prefs")
        .assert()
        .success()
        .stdout(predicate::str::contains("no prefs set"));
}

#[test]
fn contract_disable_hides_banner() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("enable").assert().success();
    cmd_for(&config).arg("disable").assert().success();
    let json = run_json(&config, &["load"]);
    assert_eq!(json["loads"][0]["visibility"], "hidden");
    assert_eq!(json["status"]["decision"], "feature_disabled");
}

#[test]
fn contract_sqlite_backend_persists() {
    let (dir, config) = setup_with_backend("sqlite");
    cmd_for(&config).arg("enable").assert().success();
    cmd_for(&config).arg("load").assert().success();
    cmd_for(&config).arg("load").assert().success();

    let json = run_json(&config, &["status"]);
    assert_eq!(json["backend"], "sqlite");
    assert_eq!(json["status"]["show_count"], 2);
    assert!(dir.path().join("data").join("prefs.db").exists());
}

// =============================================================================
// error paths
// =============================================================================

#[test]
fn contract_missing_config_fails_with_remediation() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");
    cmd_for(&missing.to_string_lossy())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Config file not found"))
        .stderr(predicate::str::contains("To fix:"));
}

#[test]
fn contract_malformed_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("privbanner.toml");
    std::fs::write(&path, "[prefs\nbackend = ").unwrap();
    cmd_for(&path.to_string_lossy())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Config parse failed"));
}

#[test]
fn contract_corrupt_prefs_file_fails() {
    let (dir, config) = setup();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("prefs.toml"), "not = [valid").unwrap();
    cmd_for(&config)
        .arg("prefs")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn contract_unknown_subcommand_is_usage_error() {
    let (_dir, config) = setup();
    cmd_for(&config).arg("explode").assert().failure();
}
