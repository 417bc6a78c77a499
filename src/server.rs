//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingestion/upload` | Multipart file upload (`file`, `document_type`, `metadata`) |
//! | `POST` | `/ingestion/salesforce` | JSON array of CRM case records |
//! | `GET`  | `/ingestion/status` | Number of ingested documents |
//! | `POST` | `/query/ask` | Answer a question from the knowledge base |
//! | `GET`  | `/query/logs` | Most recent query log entries (`?limit=1..100`) |
//! | `GET`  | `/health` | Liveness and backend configuration |
//! | `GET`  | `/` | Service description |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `ingestion_failed` (500),
//! `query_failed` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::ingest::IngestFailure;
use crate::models::{CaseRecord, Metadata, QueryLogEntry, Source};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_LOG_LIMIT: usize = 10;
const MAX_LOG_LIMIT: usize = 100;

type AppState = Arc<App>;

/// Builds the router with all routes and middleware.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/ingestion/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/ingestion/salesforce", post(handle_salesforce))
        .route("/ingestion/status", get(handle_status))
        .route("/query/ask", post(handle_ask))
        .route("/query/logs", get(handle_logs))
        .route("/health", get(handle_health))
        .route("/", get(handle_root))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

/// Binds to `[server].bind` and serves until Ctrl-C.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    println!("AskAccess listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    app.close().await;
    tracing::info!("server stopped");
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn ingestion_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "ingestion_failed",
        message: message.into(),
    }
}

fn query_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "query_failed",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

// ============ POST /ingestion/upload ============

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    document_id: String,
    filename: String,
    stored_path: String,
    document_type: String,
    metadata: Metadata,
}

async fn handle_upload(
    State(app): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut multipart = multipart.map_err(|e| bad_request(e.body_text()))?;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut document_type = "knowledge_base".to_string();
    let mut metadata_json: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
                file = Some((name, bytes.to_vec()));
            }
            "document_type" => {
                document_type = field.text().await.map_err(|e| bad_request(e.body_text()))?;
            }
            "metadata" => {
                metadata_json = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing multipart field: file"))?;

    let mut metadata = match metadata_json.as_deref().map(str::trim) {
        None | Some("") => Metadata::new(),
        Some(raw) => serde_json::from_str::<Metadata>(raw)
            .map_err(|_| bad_request("Invalid metadata JSON"))?,
    };
    metadata.insert(
        "document_type".into(),
        serde_json::Value::String(document_type.clone()),
    );

    let receipt = app
        .pipeline
        .ingest_upload(&filename, &bytes, metadata.clone())
        .await
        .map_err(|e| {
            tracing::warn!(filename = %filename, error = %e, "upload ingestion failed");
            ingestion_failed(format!("Error ingesting document: {:#}", e))
        })?;

    Ok(Json(UploadResponse {
        status: "success",
        document_id: receipt.document_id,
        filename,
        stored_path: receipt.stored_path.display().to_string(),
        document_type,
        metadata,
    }))
}

// ============ POST /ingestion/salesforce ============

#[derive(Serialize)]
struct BatchResponse {
    status: &'static str,
    document_count: usize,
    document_ids: Vec<String>,
    failures: Vec<IngestFailure>,
}

async fn handle_salesforce(
    State(app): State<AppState>,
    payload: Result<Json<Vec<CaseRecord>>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    let Json(records) = payload.map_err(|e| bad_request(e.body_text()))?;
    let report = app.pipeline.ingest_structured_records(&records).await;

    let status = if report.failures.is_empty() {
        "success"
    } else if report.document_ids.is_empty() {
        "failed"
    } else {
        "partial"
    };
    Ok(Json(BatchResponse {
        status,
        document_count: report.document_ids.len(),
        document_ids: report.document_ids,
        failures: report.failures,
    }))
}

// ============ GET /ingestion/status ============

#[derive(Serialize)]
struct StatusResponse {
    document_count: usize,
    status: &'static str,
}

async fn handle_status(State(app): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let document_count = app.store.document_count().await.map_err(internal)?;
    Ok(Json(StatusResponse {
        document_count,
        status: "ready",
    }))
}

// ============ POST /query/ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default = "default_include_sources")]
    include_sources: bool,
}

fn default_include_sources() -> bool {
    true
}

#[derive(Serialize)]
struct AskResponse {
    query: String,
    answer: String,
    sources: Option<Vec<Source>>,
    processing_time: f64,
    timestamp: DateTime<Utc>,
}

async fn handle_ask(
    State(app): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;

    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = app
        .config
        .retrieval
        .resolve_k(req.max_results)
        .map_err(|e| bad_request(e.to_string()))?;

    let outcome = app
        .processor
        .process_query(&req.query, k, req.include_sources)
        .await;

    match (outcome.answer, outcome.error) {
        (Some(answer), None) => Ok(Json(AskResponse {
            query: outcome.query,
            answer,
            sources: outcome.sources,
            processing_time: outcome.processing_time,
            timestamp: outcome.timestamp,
        })),
        (_, error) => Err(query_failed(
            error.unwrap_or_else(|| "query produced no answer".to_string()),
        )),
    }
}

// ============ GET /query/logs ============

#[derive(Deserialize)]
struct LogsParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<QueryLogEntry>,
}

async fn handle_logs(
    State(app): State<AppState>,
    params: Result<Query<LogsParams>, QueryRejection>,
) -> Result<Json<LogsResponse>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LOG_LIMIT
        )));
    }

    let logs = app.logger.get_query_logs(limit).await.map_err(internal)?;
    Ok(Json(LogsResponse { logs }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    embedding_configured: bool,
    generation_configured: bool,
    document_store_initialized: bool,
}

async fn handle_health(State(app): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        embedding_configured: app.embedding_configured(),
        generation_configured: app.generation_configured(),
        document_store_initialized: app.store.document_count().await.is_ok(),
    })
}

// ============ GET / ============

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    message: &'static str,
    description: &'static str,
    health: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "AskAccess",
        message: "Welcome to AskAccess API",
        description: "AI assistant for answering internal employee questions and customer queries",
        health: "/health",
    })
}
