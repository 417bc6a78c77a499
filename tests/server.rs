//! HTTP API tests against a real server on a free local port.

use askaccess::app::App;
use askaccess::config::Config;
use askaccess::embedding::HashEmbedder;
use askaccess::generation::{GenerationError, Generator};
use askaccess::server::run_server;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

// ─── Test generator ─────────────────────────────────────────────────

/// Replies with a fixed sentence; questions containing `explode` fail.
struct ScriptedGenerator;

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        if prompt.contains("Question: explode") {
            return Err(GenerationError::Request("model overloaded".into()));
        }
        Ok("Payroll is run from the Payroll menu.".to_string())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Starts a server rooted in `tmp` and returns its base URL.
async fn start_server(tmp: &TempDir) -> String {
    let port = find_free_port();
    let mut config = Config::for_root(tmp.path().join("data"));
    config.server.bind = format!("127.0.0.1:{}", port);

    let app = App::with_backends(
        config,
        Arc::new(HashEmbedder::new(256)),
        Arc::new(ScriptedGenerator),
    )
    .await
    .unwrap();

    tokio::spawn(async move {
        run_server(Arc::new(app)).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn upload(client: &reqwest::Client, base: &str, form: Form) -> reqwest::Response {
    client
        .post(format!("{}/ingestion/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn ask(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{}/query/ask", base))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn error_code(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}

const PAYROLL: &str = "Payroll runs are scheduled from the Payroll menu. Choose a pay period and submit.";

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_root() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["document_store_initialized"], true);
    assert!(health["version"].is_string());
    assert!(health["timestamp"].is_string());

    let root: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(root["name"], "AskAccess");
    assert_eq!(root["health"], "/health");
}

#[tokio::test]
async fn test_upload_then_ask_then_logs() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part(
            "file",
            Part::bytes(PAYROLL.as_bytes().to_vec()).file_name("Payroll Guide.txt"),
        )
        .text("document_type", "policy")
        .text("metadata", r#"{"department": "Finance"}"#);
    let resp = upload(&client, &base, form).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["filename"], "Payroll Guide.txt");
    assert_eq!(body["document_type"], "policy");
    assert_eq!(body["metadata"]["department"], "Finance");
    assert_eq!(body["metadata"]["document_type"], "policy");
    assert_eq!(body["document_id"].as_str().unwrap().len(), 32);
    assert!(body["stored_path"]
        .as_str()
        .unwrap()
        .ends_with("_Payroll_Guide.txt"));

    let status: Value = client
        .get(format!("{}/ingestion/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status, json!({"document_count": 1, "status": "ready"}));

    let resp = ask(&client, &base, json!({"query": "How do I run payroll?"})).await;
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert_eq!(answer["answer"], "Payroll is run from the Payroll menu.");
    assert_eq!(answer["query"], "How do I run payroll?");
    let sources = answer["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["content"], PAYROLL);
    assert_eq!(sources[0]["metadata"]["department"], "Finance");
    assert_eq!(sources[0]["metadata"]["chunk_index"], 0);

    let resp = ask(
        &client,
        &base,
        json!({"query": "How do I run payroll?", "include_sources": false}),
    )
    .await;
    let answer: Value = resp.json().await.unwrap();
    assert!(answer["sources"].is_null());

    let logs: Value = client
        .get(format!("{}/query/logs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs["logs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_rejects_bad_input() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("file", Part::bytes(b"hello".to_vec()).file_name("a.txt"))
        .text("metadata", "{not json");
    let resp = upload(&client, &base, form).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "bad_request");

    let form = Form::new().text("document_type", "policy");
    let resp = upload(&client, &base, form).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "bad_request");

    let form = Form::new().part("file", Part::bytes(b"   ".to_vec()).file_name("blank.txt"));
    let resp = upload(&client, &base, form).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(error_code(resp).await, "ingestion_failed");
}

#[tokio::test]
async fn test_salesforce_ingestion() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let cases = json!([
        {"Id": "500A", "CaseNumber": "00001", "Subject": "Login loop", "Status": "Closed",
         "Description": "User stuck at login", "Comments": [{"CommentBody": "Cleared cookies"}]},
        {"Id": "500B", "Subject": "Invoice PDF blank", "Priority": "High"}
    ]);
    let resp = client
        .post(format!("{}/ingestion/salesforce", base))
        .json(&cases)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["document_count"], 2);
    assert_eq!(body["document_ids"].as_array().unwrap().len(), 2);
    assert!(body["failures"].as_array().unwrap().is_empty());

    let resp = client
        .post(format!("{}/ingestion/salesforce", base))
        .header("content-type", "application/json")
        .body("{\"not\": \"an array\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "bad_request");
}

#[tokio::test]
async fn test_ask_validation_and_failures() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = ask(&client, &base, json!({"query": "   "})).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_code(resp).await, "bad_request");

    for k in [0, 101] {
        let resp = ask(&client, &base, json!({"query": "payroll", "max_results": k})).await;
        assert_eq!(resp.status(), 400, "max_results={}", k);
    }

    // Empty index: fallback answer, not an error.
    let resp = ask(&client, &base, json!({"query": "explode"})).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["answer"],
        "I don't have enough information to answer this question based on the available knowledge base."
    );

    let form = Form::new().part(
        "file",
        Part::bytes(PAYROLL.as_bytes().to_vec()).file_name("p.txt"),
    );
    assert_eq!(upload(&client, &base, form).await.status(), 200);

    let resp = ask(&client, &base, json!({"query": "explode"})).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(error_code(resp).await, "query_failed");

    let logs: Value = client
        .get(format!("{}/query/logs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // Rejected requests never reach the pipeline, so only two entries.
    let logs = logs["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1]["is_error"], true);
}

#[tokio::test]
async fn test_logs_limit() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    for i in 0..7 {
        let resp = ask(&client, &base, json!({"query": format!("question {}", i)})).await;
        assert_eq!(resp.status(), 200);
    }

    let logs: Value = client
        .get(format!("{}/query/logs?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs["logs"].as_array().unwrap().len(), 5);

    for bad in ["0", "101", "many"] {
        let resp = client
            .get(format!("{}/query/logs?limit={}", base, bad))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "limit={}", bad);
        assert_eq!(error_code(resp).await, "bad_request");
    }
}
