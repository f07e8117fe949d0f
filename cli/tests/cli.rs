//! End-to-end tests for the chatmem binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a Command for the chatmem binary, isolated from user config and env.
#[allow(deprecated)]
fn chatmem_cmd(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("chatmem").expect("Failed to find chatmem binary");
    cmd.env("XDG_CONFIG_HOME", temp_dir.path().join("config"))
        .env("NO_COLOR", "1")
        .env_remove("CHATMEM_MEMORY_DIR")
        .env_remove("CHATMEM_CONTEXT_WINDOW")
        .env_remove("CHATMEM_DEFAULT_MODEL")
        .env_remove("CHATMEM_WINDOW_TRIM_RATIO")
        .env_remove("RUST_LOG")
        .arg("--memory-dir")
        .arg(temp_dir.path().join("memory"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("estimate"))
        .stdout(predicate::str::contains("budget"))
        .stdout(predicate::str::contains("migrate"));
}

#[test]
fn test_estimate_json() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["--json", "estimate", "hello world", "--actual", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"estimated_tokens\": 4"))
        .stdout(predicate::str::contains("\"actual_tokens\": 2"));
}

#[test]
fn test_analyze_reports_factors() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["analyze", "How do I implement a cache?", "--mode", "tools"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Complexity:"))
        .stdout(predicate::str::contains("keywords"));
}

#[test]
fn test_budget_json_allocation() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["--json", "budget", "hi", "--window", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"conversation_memory\": 497"))
        .stdout(predicate::str::contains("\"is_valid\": true"));
}

#[test]
fn test_budget_rejects_zero_window() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["budget", "hi", "--window", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("greater than zero"));
}

#[test]
fn test_unknown_mode_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["budget", "hi", "--mode", "agent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown interaction mode"));
}

#[test]
fn test_record_history_and_context() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args([
            "record",
            "--model",
            "llama3:8b",
            "--user",
            "What is a lifetime?",
            "--assistant",
            "A scope for which a reference is valid.",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded exchange for llama3:8b"));

    chatmem_cmd(&temp_dir)
        .args(["--json", "history", "--model", "llama3:8b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("What is a lifetime?"));

    chatmem_cmd(&temp_dir)
        .args(["--json", "context", "And borrowing?", "--model", "llama3:8b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"role\": \"user\""))
        .stdout(predicate::str::contains("A scope for which a reference is valid."));

    chatmem_cmd(&temp_dir)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("llama3:8b"));
}

#[test]
fn test_clear_keeps_summary() {
    let temp_dir = TempDir::new().expect("temp dir");
    chatmem_cmd(&temp_dir)
        .args(["record", "--user", "q", "--assistant", "a"])
        .assert()
        .success();

    chatmem_cmd(&temp_dir)
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 1 exchanges"));

    chatmem_cmd(&temp_dir)
        .args(["--json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_exchanges\": 0"))
        .stdout(predicate::str::contains("\"summarized_conversations\": 1"));
}

#[test]
fn test_migrate_legacy_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let legacy_path = temp_dir.path().join("old_memory.json");
    fs::write(
        &legacy_path,
        r#"{"current_conversation": [{"user": "hello", "assistant": "hi there"}]}"#,
    )
    .expect("write legacy");

    chatmem_cmd(&temp_dir)
        .arg("migrate")
        .arg("--path")
        .arg(&legacy_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Migrated 1 exchanges into qwen2.5:3b"));

    chatmem_cmd(&temp_dir)
        .args(["--json", "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hi there"));
}

#[test]
fn test_config_file_is_applied() {
    let temp_dir = TempDir::new().expect("temp dir");
    let config_path = temp_dir.path().join("chatmem.toml");
    fs::write(&config_path, "default_model = \"mistral:7b\"\ncontext_window = 8192\n")
        .expect("write config");

    chatmem_cmd(&temp_dir)
        .arg("--config")
        .arg(&config_path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("default_model = \"mistral:7b\""))
        .stdout(predicate::str::contains("context_window = 8192"));
}
