use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pushlens_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pushlens"))
}

const PUSH_PAYLOAD: &str = r#"{
  "ref": "refs/heads/main",
  "repository": { "full_name": "acme/widgets" },
  "pusher": { "name": "dev", "email": "dev@acme.test" },
  "commits": [
    {
      "id": "1111111111111111111111111111111111111111",
      "message": "add parser",
      "timestamp": "2024-05-01T10:00:00Z",
      "author": { "name": "Dev", "email": "dev@acme.test" },
      "added": ["src/parser.py", "tests/test_parser.py"],
      "removed": [],
      "modified": ["README.md"]
    },
    {
      "id": "2222222222222222222222222222222222222222",
      "message": "drop legacy",
      "timestamp": "2024-05-01T10:05:00Z",
      "author": { "name": "Dev", "email": "dev@acme.test" },
      "added": [],
      "removed": ["legacy/old.js"],
      "modified": []
    }
  ]
}"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    fs::write(root.join("push.json"), PUSH_PAYLOAD).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/pushlens.sqlite"

[server]
bind = "127.0.0.1:0"

[webhook]
secret = "mydevsecret"

[github]
fetch_commits = false

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("pushlens.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pushlens(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pushlens_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("PUSHLENS_WEBHOOK_SECRET")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pushlens binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn payload_path(tmp: &TempDir) -> String {
    tmp.path().join("push.json").to_str().unwrap().to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pushlens(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/pushlens.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_pushlens(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_pushlens(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_analyze_offline_without_config_file() {
    let (tmp, _config_path) = setup_test_env();
    let missing_config = tmp.path().join("nope.toml");

    let (stdout, stderr, success) =
        run_pushlens(&missing_config, &["analyze", &payload_path(&tmp)]);
    assert!(success, "analyze failed: stdout={}, stderr={}", stdout, stderr);

    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["repository"], "acme/widgets");
    assert_eq!(report["git_ref"], "refs/heads/main");
    assert_eq!(report["diff_stats"]["files_changed"], 4);

    let commits = report["commits"].as_array().unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0]["source"], "payload");
    assert_eq!(commits[0]["files_changed"], 3);
    assert_eq!(
        commits[0]["summary"]["language_summary"]["primary_language"],
        "python"
    );
}

#[test]
fn test_analyze_rejects_payload_without_pusher() {
    let (tmp, config_path) = setup_test_env();
    let bad = tmp.path().join("bad.json");
    fs::write(
        &bad,
        r#"{"repository": {"full_name": "acme/widgets"}, "commits": []}"#,
    )
    .unwrap();

    let (_, stderr, success) = run_pushlens(&config_path, &["analyze", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("pusher.name"), "stderr={}", stderr);
}

#[test]
fn test_analyze_store_then_query() {
    let (tmp, config_path) = setup_test_env();
    run_pushlens(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_pushlens(&config_path, &["analyze", &payload_path(&tmp), "--store"]);
    assert!(success, "store failed: stdout={}, stderr={}", stdout, stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["commits"][0]["outcome"], "stored");
    assert_eq!(report["commits"][1]["outcome"], "stored");

    let (stdout, _, success) = run_pushlens(&config_path, &["events"]);
    assert!(success);
    assert!(stdout.contains("acme/widgets"));
    assert!(stdout.contains("111111111111"));
    assert!(stdout.contains("222222222222"));

    let (stdout, stderr, success) = run_pushlens(
        &config_path,
        &["get", "acme/widgets", "1111111111111111111111111111111111111111"],
    );
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("refs/heads/main"));
    assert!(stdout.contains("diff:         absent"));
    assert!(stdout.contains("--- Analysis ---"));

    let (stdout, _, success) = run_pushlens(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Events:      2"));
    assert!(stdout.contains("acme/widgets"));
}

#[test]
fn test_analyze_store_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    run_pushlens(&config_path, &["init"]);

    let (_, _, success) =
        run_pushlens(&config_path, &["analyze", &payload_path(&tmp), "--store"]);
    assert!(success);

    let (stdout, stderr, success) =
        run_pushlens(&config_path, &["analyze", &payload_path(&tmp), "--store"]);
    assert!(success, "second store failed: stderr={}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["commits"][0]["outcome"], "duplicate");
    assert_eq!(report["commits"][1]["outcome"], "duplicate");
    assert!(stderr.contains("0 stored, 2 duplicate"));

    let (stdout, _, _) = run_pushlens(&config_path, &["stats"]);
    assert!(stdout.contains("Events:      2"));
}

#[test]
fn test_get_patch_without_diff() {
    let (tmp, config_path) = setup_test_env();
    run_pushlens(&config_path, &["init"]);
    run_pushlens(&config_path, &["analyze", &payload_path(&tmp), "--store"]);

    let (stdout, _, success) = run_pushlens(
        &config_path,
        &[
            "get",
            "acme/widgets",
            "2222222222222222222222222222222222222222",
            "--patch",
        ],
    );
    assert!(success);
    assert!(stdout.contains("(no diff content)"));
}

#[test]
fn test_get_missing_event() {
    let (_tmp, config_path) = setup_test_env();
    run_pushlens(&config_path, &["init"]);

    let (_, stderr, success) = run_pushlens(&config_path, &["get", "acme/widgets", "deadbeef"]);
    assert!(!success);
    assert!(stderr.contains("event not found"));
}

#[test]
fn test_sign_uses_configured_secret() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pushlens(&config_path, &["sign", &payload_path(&tmp)]);
    assert!(success, "sign failed: stderr={}", stderr);

    let expected = pushlens::signature::sign(b"mydevsecret", PUSH_PAYLOAD.as_bytes());
    assert_eq!(stdout.trim(), expected);
    assert!(stdout.starts_with("sha256="));
}

#[test]
fn test_sign_secret_flag_overrides_config() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_pushlens(
        &config_path,
        &["sign", &payload_path(&tmp), "--secret", "other"],
    );
    assert!(success);
    let expected = pushlens::signature::sign(b"other", PUSH_PAYLOAD.as_bytes());
    assert_eq!(stdout.trim(), expected);
}
