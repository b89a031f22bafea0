//! HTTP boundary.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload?filename=NAME` | Raw file or ZIP body; returns pending tickets (202) |
//! | `GET`  | `/documents` | All source documents with status |
//! | `GET`  | `/documents/{hash}` | Poll one document's status |
//! | `POST` | `/ask` | `{ "query", "user"? }` → answer and citations |
//! | `POST` | `/draft` | `{ "request", "context"?, "use_retrieval"? }` → Markdown draft |
//! | `POST` | `/source` | `{ "chunk_id" }` or `{ "filename", "page" }` → stored text |
//! | `GET`  | `/chunks/{id}` | One stored chunk |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unavailable", "message": "The assistant is temporarily unavailable. ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `unavailable` (503),
//! `internal` (500). An answer with no evidence is a normal 200 response
//! with `"outcome": "insufficient_evidence"`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app::LegalRag;
use crate::config::Config;
use crate::draft::{Draft, DraftRequest};
use crate::error::QueryError;
use crate::ingest::Submission;
use crate::lookup::{SourcePassage, SourceRef};
use crate::models::{Answer, Chunk, SourceDocument};

/// Starts the HTTP server on `[server].bind` with SQLite storage.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = LegalRag::open(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    serve(app, listener).await
}

/// Serve `app` on an already-bound listener.
pub async fn serve(app: LegalRag, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub fn router(app: LegalRag) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = app.config.server.max_upload_bytes;

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{hash}", get(handle_document))
        .route("/ask", post(handle_ask))
        .route("/draft", post(handle_draft))
        .route("/source", post(handle_source))
        .route("/chunks/{id}", get(handle_chunk))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(cors)
        .with_state(app)
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "internal error".to_string(),
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::EmptyQuery => bad_request(err.user_message()),
            QueryError::Unavailable(cause) => {
                tracing::warn!(error = %cause, "dependency unavailable");
                AppError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    code: "unavailable",
                    message: err.user_message().to_string(),
                }
            }
            QueryError::Storage(cause) => {
                tracing::error!(error = %cause, "storage failure during query");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: err.user_message().to_string(),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

async fn handle_upload(
    State(app): State<LegalRag>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let filename = params.filename.trim();
    if filename.is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    if body.is_empty() {
        return Err(bad_request("upload body is empty"));
    }
    let submission = app
        .ingest
        .submit(filename, body.to_vec())
        .await
        .map_err(internal)?;
    tracing::info!(
        filename,
        files = submission.tickets.len(),
        skipped = submission.skipped.len(),
        "upload accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

// ============ GET /documents ============

async fn handle_list_documents(
    State(app): State<LegalRag>,
) -> Result<Json<Vec<SourceDocument>>, AppError> {
    Ok(Json(app.ingest.documents().await.map_err(internal)?))
}

async fn handle_document(
    State(app): State<LegalRag>,
    Path(hash): Path<String>,
) -> Result<Json<SourceDocument>, AppError> {
    app.ingest
        .status(&hash)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no document with hash {}", hash)))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    /// Caller identity, for the caller's own history; not used for retrieval.
    #[serde(default)]
    user: Option<String>,
}

async fn handle_ask(
    State(app): State<LegalRag>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    tracing::debug!(user = req.user.as_deref().unwrap_or("-"), "ask");
    Ok(Json(app.assistant.answer(&req.query).await?))
}

// ============ POST /draft ============

async fn handle_draft(
    State(app): State<LegalRag>,
    Json(req): Json<DraftRequest>,
) -> Result<Json<Draft>, AppError> {
    Ok(Json(app.drafter.draft(&req).await?))
}

// ============ Source lookup ============

async fn handle_source(
    State(app): State<LegalRag>,
    Json(source): Json<SourceRef>,
) -> Result<Json<SourcePassage>, AppError> {
    app.lookup
        .resolve(&source)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found("no stored passage for this reference"))
}

async fn handle_chunk(
    State(app): State<LegalRag>,
    Path(id): Path<String>,
) -> Result<Json<Chunk>, AppError> {
    app.lookup
        .chunk(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no chunk with id {}", id)))
}
