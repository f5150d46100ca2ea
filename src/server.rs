//! Knowledge-base HTTP server.
//!
//! Exposes ingestion and diagnostics as a small JSON API so the chat backend
//! (or any HTTP client) can push documents into the knowledge base.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/kb/ingest` | Ingest one document (JSON [`IngestRequest`]) |
//! | `GET`  | `/api/kb/diag` | Counts for `?tenantId=` and optional `&docId=` |
//! | `GET`  | `/api/kb/diag/embed` | Embed `?text=` with optional `&modelId=` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The ingest endpoint also reads the `X-Tenant-Id`, `X-Doc-Id` and
//! `Embedding-Model-Id` headers. A header only applies when the matching
//! body field is absent or blank.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Empty text - nothing to ingest" } }
//! ```
//!
//! Error codes: `bad_request` (400), `ingest_failed` (500).

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::diag::{self, EmbedProbe, KbDiagnostics};
use crate::ingest::{IngestError, Ingestor};
use crate::models::{IngestRequest, IngestSummary};

const TENANT_HEADER: &str = "x-tenant-id";
const DOC_ID_HEADER: &str = "x-doc-id";
const MODEL_HEADER: &str = "embedding-model-id";

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    pub fn new(config: Config, ingestor: Ingestor) -> Self {
        Self {
            config: Arc::new(config),
            ingestor: Arc::new(ingestor),
        }
    }
}

/// Build the application router. Separate from [`run_server`] so tests can
/// drive it without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/kb/ingest", post(handle_ingest))
        .route("/api/kb/diag", get(handle_diag))
        .route("/api/kb/diag/embed", get(handle_diag_embed))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ingestor = Ingestor::from_config(config).await?;
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), ingestor));

    info!(
        bind = %bind_addr,
        provider = config.embedding.provider.as_str(),
        "kb server listening"
    );
    println!("KB server listening on http://{}", bind_addr);

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

fn ingest_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "ingest_failed".to_string(),
        message: message.into(),
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        if err.is_validation() {
            bad_request(err.to_string())
        } else {
            error!(error = %err, "ingest request failed");
            ingest_failed(err.to_string())
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

// ============ POST /api/kb/ingest ============

/// Fill absent or blank body fields from the request headers.
fn apply_header_overrides(request: &mut IngestRequest, headers: &HeaderMap) {
    fill_from_header(&mut request.tenant_id, headers, TENANT_HEADER);
    fill_from_header(&mut request.doc_id, headers, DOC_ID_HEADER);
    fill_from_header(&mut request.embedding_model_id, headers, MODEL_HEADER);
}

fn fill_from_header(field: &mut Option<String>, headers: &HeaderMap, name: &str) {
    if field.as_deref().is_some_and(|v| !v.trim().is_empty()) {
        return;
    }
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(value) = value {
        *field = Some(value.to_string());
    }
}

async fn handle_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<IngestRequest>,
) -> Result<Json<IngestSummary>, AppError> {
    apply_header_overrides(&mut request, &headers);
    let summary = state.ingestor.ingest(&request).await?;
    Ok(Json(summary))
}

// ============ GET /api/kb/diag ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiagParams {
    tenant_id: Option<String>,
    doc_id: Option<String>,
}

async fn handle_diag(
    State(state): State<AppState>,
    Query(params): Query<DiagParams>,
) -> Json<KbDiagnostics> {
    let tenant = params
        .tenant_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.config.ingest.default_tenant.clone());
    let report = diag::diagnose(state.ingestor.pool(), &tenant, params.doc_id.as_deref()).await;
    Json(report)
}

// ============ GET /api/kb/diag/embed ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbedParams {
    text: Option<String>,
    model_id: Option<String>,
}

async fn handle_diag_embed(
    State(state): State<AppState>,
    Query(params): Query<EmbedParams>,
) -> Json<EmbedProbe> {
    let probe = diag::probe_embedding(
        state.ingestor.embedder(),
        params.text.as_deref(),
        params.model_id.as_deref(),
    )
    .await;
    Json(probe)
}
