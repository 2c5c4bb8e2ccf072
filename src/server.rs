//! HTTP API server for the fact-check service.
//!
//! # Endpoints
//!
//! | Method   | Path                   | Description |
//! |----------|------------------------|-------------|
//! | `GET`    | `/api/health`          | Health check with chunk count and LLM availability |
//! | `GET`    | `/api/stats`           | Vector store statistics |
//! | `POST`   | `/api/fact-check`      | Retrieve context and generate a verdict |
//! | `POST`   | `/api/query`           | Context retrieval only, confidence-filtered |
//! | `GET`    | `/api/files`           | List documents with processing status |
//! | `POST`   | `/api/upload`          | Upload and ingest a document |
//! | `DELETE` | `/api/files/{name}`    | Remove a document and its chunks |
//! | `POST`   | `/api/clear-database`  | Drop every stored chunk |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser extensions can
//! call the API directly.

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::OpenAiEmbedder;
use crate::extract::{is_supported, SUPPORTED_EXTENSIONS};
use crate::factcheck::FactCheckOrchestrator;
use crate::ingest::Ingestor;
use crate::llm::OpenAiChat;
use crate::models::RetrievalResult;
use crate::retrieval::RetrievalService;
use crate::store::VectorStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<VectorStore>,
    retrieval: Arc<RetrievalService>,
    ingestor: Arc<Ingestor>,
    /// Absent when no LLM credentials are configured; fact-check requests
    /// then return context only.
    orchestrator: Option<Arc<FactCheckOrchestrator>>,
}

/// Starts the HTTP server on `[server].bind`, building production components
/// from configuration. Requires `OPENAI_API_KEY` for query embedding; the
/// chat provider is optional and degrades to retrieval-only responses.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(VectorStore::open(&config.store.path, &config.store.collection).await?);
    let embedder = Arc::new(OpenAiEmbedder::from_config(&config.embedding)?);

    let orchestrator = match OpenAiChat::from_config(&config.llm) {
        Ok(chat) => Some(Arc::new(FactCheckOrchestrator::new(Arc::new(chat)))),
        Err(e) => {
            warn!(error = %e, "chat provider unavailable, serving retrieval only");
            None
        }
    };

    run_server_with_components(config, store, embedder, orchestrator).await
}

/// Starts the server with injected components.
pub async fn run_server_with_components(
    config: &Config,
    store: Arc<VectorStore>,
    embedder: Arc<dyn crate::embedding::Embedder>,
    orchestrator: Option<Arc<FactCheckOrchestrator>>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let retrieval = Arc::new(RetrievalService::new(
        store.clone(),
        embedder.clone(),
        config.retrieval.max_results,
    ));
    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        embedder,
        config.as_ref().clone(),
    ));

    let state = AppState {
        config,
        store,
        retrieval,
        ingestor,
        orchestrator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/stats", get(handle_stats))
        .route("/api/fact-check", post(handle_fact_check))
        .route("/api/query", post(handle_query))
        .route("/api/files", get(handle_list_files))
        .route("/api/upload", post(handle_upload))
        .route("/api/files/{filename}", delete(handle_delete_file))
        .route("/api/clear-database", post(handle_clear))
        .layer(cors)
        .with_state(state);

    info!(addr = %bind_addr, "API server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Reject names that could escape the documents directory.
fn validate_filename(filename: &str) -> Result<(), AppError> {
    if filename.is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(bad_request("filename must not contain path separators"));
    }
    Ok(())
}

// ============ Request / response types ============

#[derive(Deserialize)]
struct FactCheckRequest {
    text: String,
    #[serde(default = "default_fact_check_results")]
    n_results: usize,
    #[serde(default = "default_use_llm")]
    use_llm: bool,
}

fn default_fact_check_results() -> usize {
    5
}
fn default_use_llm() -> bool {
    true
}

#[derive(Deserialize)]
struct QueryRequest {
    text: String,
    #[serde(default = "default_query_results")]
    n_results: usize,
}

fn default_query_results() -> usize {
    3
}

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// File body, base64-encoded.
    content_base64: String,
    source_url: String,
}

/// One retrieval hit in API shape: `source` carries the document URL or
/// null, `document_url` mirrors it as a plain string for older clients.
#[derive(Serialize)]
struct ContextChunk {
    text: String,
    source_file: String,
    source: Option<String>,
    document_url: String,
    chunk_index: i64,
    confidence: f64,
    distance: f64,
}

impl From<RetrievalResult> for ContextChunk {
    fn from(hit: RetrievalResult) -> Self {
        let source = if hit.source_url.is_empty() {
            None
        } else {
            Some(hit.source_url.clone())
        };
        Self {
            text: hit.text,
            source_file: hit.source_file,
            source,
            document_url: hit.source_url,
            chunk_index: hit.chunk_index,
            confidence: hit.confidence,
            distance: hit.distance,
        }
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let total_chunks = state.store.count().await.map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "status": "healthy",
        "database": "connected",
        "llm_available": state.orchestrator.is_some(),
        "total_chunks": total_chunks,
        "timestamp": now(),
    })))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.store.stats().await.map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({
        "status": "success",
        "database_stats": stats,
        "timestamp": now(),
    })))
}

async fn handle_fact_check(
    State(state): State<AppState>,
    Json(request): Json<FactCheckRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let results = state
        .retrieval
        .retrieve(&text, request.n_results)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let mut response = json!({
        "status": "success",
        "query": text,
        "context": results.iter().cloned().map(ContextChunk::from).collect::<Vec<_>>(),
        "total_context_chunks": results.len(),
        "timestamp": now(),
    });

    if request.use_llm {
        match &state.orchestrator {
            Some(orchestrator) => {
                let outcome = orchestrator.fact_check(&text, &results).await;
                if outcome.status == "success" {
                    response["fact_check"] = json!(outcome.fact_check);
                } else {
                    warn!(error = ?outcome.error, "fact-check generation failed");
                }
                response["llm_response"] = json!(outcome);
            }
            None => {
                response["message"] =
                    json!("LLM service requires an API key - set OPENAI_API_KEY");
            }
        }
    } else if results.is_empty() {
        response["message"] = json!("No relevant context found for fact-checking");
    }

    Ok(Json(response))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(bad_request("text must not be empty"));
    }

    let results = state
        .retrieval
        .retrieve(&text, request.n_results)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let min_confidence = state.config.retrieval.min_confidence;
    let context: Vec<ContextChunk> = results
        .into_iter()
        .filter(|r| r.confidence > min_confidence)
        .map(ContextChunk::from)
        .collect();

    Ok(Json(json!({
        "status": "success",
        "query": text,
        "message": format!("Found {} relevant context chunks", context.len()),
        "context": context,
        "timestamp": now(),
    })))
}

async fn handle_list_files(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let docs_dir = &state.config.documents.dir;
    std::fs::create_dir_all(docs_dir).map_err(|e| internal(e.to_string()))?;

    let stats = state.store.stats().await.map_err(|e| internal(e.to_string()))?;

    let mut files = Vec::new();
    let entries = std::fs::read_dir(docs_dir).map_err(|e| internal(e.to_string()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !path.is_file() || !is_supported(&name) {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| internal(e.to_string()))?;
        let last_modified = metadata
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        files.push(json!({
            "name": name,
            "size": metadata.len(),
            "processed": stats.total_chunks > 0,
            "last_modified": last_modified,
        }));
    }
    files.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Ok(Json(json!({
        "status": "success",
        "files": files,
        "total_files": files.len(),
        "database_stats": stats,
        "timestamp": now(),
    })))
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Response, AppError> {
    validate_filename(&request.filename)?;

    let source_url = request.source_url.trim().to_string();
    if source_url.is_empty() {
        return Err(bad_request("source_url is required"));
    }
    if !is_supported(&request.filename) {
        return Err(bad_request(format!(
            "file type not allowed, supported: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let content = base64::engine::general_purpose::STANDARD
        .decode(&request.content_base64)
        .map_err(|e| bad_request(format!("invalid base64 content: {e}")))?;

    let docs_dir = &state.config.documents.dir;
    std::fs::create_dir_all(docs_dir).map_err(|e| internal(e.to_string()))?;

    let file_path: PathBuf = docs_dir.join(&request.filename);
    if file_path.exists() {
        return Err(conflict("file already exists"));
    }
    std::fs::write(&file_path, &content).map_err(|e| internal(e.to_string()))?;
    info!(file = %request.filename, url = %source_url, "file uploaded");

    match state.ingestor.ingest_file(&file_path, &source_url).await {
        Ok(0) => Err(bad_request("no content extracted from file")),
        Ok(chunks) => Ok(Json(json!({
            "status": "success",
            "message": "File uploaded and processed successfully",
            "filename": request.filename,
            "source_url": source_url,
            "chunks_created": chunks,
            "processed": true,
            "timestamp": now(),
        }))
        .into_response()),
        Err(e) => {
            // The file stays on disk for a later re-ingestion attempt.
            warn!(file = %request.filename, error = %e, "processing failed after upload");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "partial_success",
                    "message": format!("File uploaded but processing failed: {e}"),
                    "filename": request.filename,
                    "source_url": source_url,
                    "processed": false,
                    "timestamp": now(),
                })),
            )
                .into_response())
        }
    }
}

async fn handle_delete_file(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_filename(&filename)?;

    let file_path = state.config.documents.dir.join(&filename);
    if !file_path.exists() {
        return Err(not_found("file not found"));
    }

    let chunks_removed = state
        .store
        .delete_by_source_file(&filename)
        .await
        .map_err(|e| internal(e.to_string()))?;
    std::fs::remove_file(&file_path).map_err(|e| internal(e.to_string()))?;
    info!(file = %filename, chunks = chunks_removed, "file deleted");

    Ok(Json(json!({
        "status": "success",
        "message": "File deleted successfully",
        "filename": filename,
        "chunks_removed": chunks_removed,
        "timestamp": now(),
    })))
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.clear().await.map_err(|e| internal(e.to_string()))?;
    info!("database cleared");
    Ok(Json(json!({
        "status": "success",
        "message": "Database cleared successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation_rejects_traversal() {
        assert!(validate_filename("facts.txt").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b.txt").is_err());
        assert!(validate_filename("a\\b.txt").is_err());
        assert!(validate_filename("").is_err());
    }

    #[test]
    fn fact_check_request_defaults() {
        let request: FactCheckRequest = serde_json::from_str(r#"{"text": "claim"}"#).unwrap();
        assert_eq!(request.n_results, 5);
        assert!(request.use_llm);
    }

    #[test]
    fn query_request_defaults() {
        let request: QueryRequest = serde_json::from_str(r#"{"text": "claim"}"#).unwrap();
        assert_eq!(request.n_results, 3);
    }

    #[test]
    fn context_chunk_maps_empty_url_to_null_source() {
        let hit = RetrievalResult {
            text: "t".to_string(),
            source_file: "f.txt".to_string(),
            source_url: String::new(),
            chunk_index: 0,
            confidence: 0.9,
            distance: 0.1,
        };
        let chunk = ContextChunk::from(hit);
        assert_eq!(chunk.source, None);
        assert_eq!(chunk.document_url, "");
    }
}
