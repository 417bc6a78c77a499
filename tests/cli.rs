//! Tests of the `askaccess` binary with local-only backends.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn askaccess_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("askaccess");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("payroll.md"),
        "# Payroll\n\nPayroll runs are scheduled from the Payroll menu.",
    )
    .unwrap();
    fs::write(
        files_dir.join("cases.json"),
        r#"[
            {"Id": "500A", "CaseNumber": "00001", "Subject": "Login loop", "Status": "Closed"},
            {"Id": "500B", "Subject": "Invoice PDF blank"}
        ]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[data]
root = "{}/data"

[chunking]
chunk_size = 1000
chunk_overlap = 200

[embedding]
provider = "hash"
dims = 128

[generation]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("askaccess.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_askaccess(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = askaccess_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run askaccess binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_index() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_askaccess(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Initialized index"));
    assert!(tmp.path().join("data/index.sqlite").exists());
    assert!(tmp.path().join("data/uploads").is_dir());
    assert!(tmp.path().join("data/query_logs").is_dir());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_askaccess(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_askaccess(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_and_status() {
    let (_tmp, config_path) = setup_test_env();

    let doc = files(&config_path, "payroll.md");
    let (stdout, stderr, success) = run_askaccess(
        &config_path,
        &["ingest", &doc, "--metadata", r#"{"team":"finance"}"#, "--meta", "owner=ops"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("document_id:"));
    assert!(stdout.contains("chunks: 1"));

    let (stdout, _, success) = run_askaccess(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("documents: 1"));
    assert!(stdout.contains("chunks: 1"));
    assert!(stdout.contains("consistent: yes"));
    assert!(stdout.contains("generation: disabled (not configured)"));
}

#[test]
fn test_ingest_rejects_bad_metadata() {
    let (_tmp, config_path) = setup_test_env();

    let doc = files(&config_path, "payroll.md");
    let (_, stderr, success) =
        run_askaccess(&config_path, &["ingest", &doc, "--metadata", "[1, 2]"]);
    assert!(!success);
    assert!(stderr.contains("JSON object"));
}

#[test]
fn test_ingest_cases() {
    let (_tmp, config_path) = setup_test_env();

    let cases = files(&config_path, "cases.json");
    let (stdout, stderr, success) = run_askaccess(&config_path, &["ingest-cases", &cases]);
    assert!(success, "ingest-cases failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 2"));
    assert!(stdout.contains("failures: 0"));
}

#[test]
fn test_ask_empty_index_gives_fallback_and_is_logged() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_askaccess(&config_path, &["ask", "Where is payroll?"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("I don't have enough information"));

    let (stdout, _, success) = run_askaccess(&config_path, &["logs", "--limit", "5"]);
    assert!(success);
    assert!(stdout.contains("Where is payroll?"));
}

#[test]
fn test_ask_without_generator_fails_and_is_logged() {
    let (_tmp, config_path) = setup_test_env();

    let doc = files(&config_path, "payroll.md");
    let (_, _, success) = run_askaccess(&config_path, &["ingest", &doc]);
    assert!(success);

    let (_, stderr, success) = run_askaccess(&config_path, &["ask", "Where is payroll?"]);
    assert!(!success);
    assert!(stderr.contains("generation provider is disabled"));

    let (stdout, _, _) = run_askaccess(&config_path, &["logs"]);
    assert!(stdout.contains("[error]"));
}

#[test]
fn test_ask_rejects_out_of_range_k_without_logging() {
    let (_tmp, config_path) = setup_test_env();

    for k in ["0", "101"] {
        let (_, stderr, success) =
            run_askaccess(&config_path, &["ask", "Where is payroll?", "-k", k]);
        assert!(!success, "k={} should be rejected", k);
        assert!(stderr.contains("max_results must be between 1 and 100"), "{}", stderr);
    }

    let (_, stderr, success) = run_askaccess(&config_path, &["ask", "   "]);
    assert!(!success);
    assert!(stderr.contains("question must not be empty"));

    let (stdout, _, success) = run_askaccess(&config_path, &["logs"]);
    assert!(success);
    assert!(stdout.contains("No query logs."));
}

#[test]
fn test_logs_empty() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_askaccess(&config_path, &["logs"]);
    assert!(success);
    assert!(stdout.contains("No query logs."));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        format!(
            "[data]\nroot = \"{}/data\"\n\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_askaccess(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"));
}
