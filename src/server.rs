//! HTTP API.
//!
//! Exposes retrieval, RAG answers, profile cleaning and the dashboard
//! queries over JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service info |
//! | `GET`  | `/health` | Health check (status, version, timestamp) |
//! | `POST` | `/query` | RAG query: `query`, `n_results`, `chat_history` |
//! | `POST` | `/upload` | Multipart `.nc`/`.csv` upload, cleaned and binned |
//! | `GET`  | `/download/{filename}` | A processed CSV |
//! | `GET`  | `/floats?year=` | Latest record per float |
//! | `GET`  | `/trajectories?year=&float=` | Float trajectories |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `processing_failed` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! Origins listed in `[server].cors_origins` are allowed; an empty list
//! allows any origin.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::clean::{self, CleanError, CleanMetadata, CleanOptions};
use crate::config::{Config, ServerConfig};
use crate::db;
use crate::floats::{self, FloatRecord, Trajectory};
use crate::rag::{self, QueryRequest, QueryResponse};

const PREVIEW_ROWS: usize = 20;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Argo API listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router. Exposed for in-process tests.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/upload", post(handle_upload))
        .route("/download/{filename}", get(handle_download))
        .route("/floats", get(handle_floats))
        .route("/trajectories", get(handle_trajectories))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
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

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Argo Profiles RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/query": "POST - Query Argo profiles",
            "/upload": "POST - Clean and bin a NetCDF/CSV profile",
            "/download/{filename}": "GET - Download a processed CSV",
            "/floats": "GET - Latest record per float (?year=)",
            "/trajectories": "GET - Float trajectories (?year=&float=)",
            "/health": "GET - Health check",
        }
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if !state.config.embedding.is_enabled() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "embeddings_disabled",
            "queries require embeddings; set [embedding] provider in config",
        ));
    }

    let response = rag::answer(&state.pool, &state.config, &request)
        .await
        .map_err(internal)?;
    Ok(Json(response))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    preview_data: Vec<serde_json::Value>,
    metadata: CleanMetadata,
    download_url: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut options = CleanOptions::from(&state.config.cleaning);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
                upload = Some((name, bytes.to_vec()));
            }
            Some("bin_size") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid bin_size: {}", e)))?;
                options.bin_size = text
                    .trim()
                    .parse()
                    .map_err(|_| bad_request(format!("invalid bin_size: {}", text)))?;
            }
            _ => {}
        }
    }

    let (original_name, bytes) = upload.ok_or_else(|| bad_request("No file uploaded"))?;
    let name = sanitize_filename(&original_name).ok_or_else(|| bad_request("No file selected"))?;
    let lower = name.to_ascii_lowercase();
    if !(lower.ends_with(".nc") || lower.ends_with(".csv")) {
        return Err(bad_request("Invalid file type. Only .nc and .csv files are allowed"));
    }

    let unique = format!("{}_{}", Utc::now().timestamp(), name);
    let output_name = PathBuf::from(&unique)
        .with_extension("csv")
        .to_string_lossy()
        .into_owned();
    let server = &state.config.server;
    let input_path = server.upload_dir.join(&unique);
    let output_path = server.processed_dir.join(&output_name);

    tokio::fs::create_dir_all(&server.upload_dir)
        .await
        .map_err(|e| internal(e.into()))?;
    tokio::fs::write(&input_path, &bytes)
        .await
        .map_err(|e| internal(e.into()))?;
    tracing::info!(file = %unique, bytes = bytes.len(), bin_size = options.bin_size, "upload received");

    let input = input_path.clone();
    let result = tokio::task::spawn_blocking(move || {
        clean::clean_and_bin_file(&input, Some(&output_path), &options)
    })
    .await
    .map_err(|e| internal(e.into()))?;

    if let Err(e) = tokio::fs::remove_file(&input_path).await {
        tracing::warn!(path = %input_path.display(), error = %e, "failed to remove upload");
    }

    let outcome = result.map_err(|e| match e.downcast_ref::<CleanError>() {
        Some(CleanError::UnsupportedInput(msg)) => {
            AppError::new(StatusCode::BAD_REQUEST, "unsupported_input", msg.clone())
        }
        Some(clean_err) => AppError::new(StatusCode::BAD_REQUEST, "processing_failed", clean_err.to_string()),
        None => internal(e),
    })?;

    Ok(Json(UploadResponse {
        success: true,
        download_url: format!("/download/{}", output_name),
        filename: output_name,
        preview_data: outcome.table.to_json_rows(Some(PREVIEW_ROWS)),
        metadata: outcome.metadata,
    }))
}

/// Keep ASCII alphanumerics, `.`, `-` and `_`; other characters become `_`.
/// Leading dots are stripped. `None` when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

// ============ GET /download/{filename} ============

async fn handle_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if sanitize_filename(&filename).as_deref() != Some(filename.as_str()) {
        return Err(bad_request(format!("invalid filename: {}", filename)));
    }

    let path = state.config.server.processed_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found(format!("File not found: {}", filename)));
        }
        Err(e) => return Err(internal(e.into())),
    };

    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ GET /floats and /trajectories ============

#[derive(Deserialize)]
struct FloatsParams {
    year: Option<i32>,
}

async fn handle_floats(
    State(state): State<AppState>,
    Query(params): Query<FloatsParams>,
) -> Result<Json<Vec<FloatRecord>>, AppError> {
    let year = params.year.unwrap_or_else(|| Utc::now().year());
    let records = floats::latest_per_float(&state.pool, year)
        .await
        .map_err(internal)?;
    Ok(Json(records))
}

#[derive(Deserialize)]
struct TrajectoryParams {
    year: Option<i32>,
    float: Option<String>,
}

#[derive(Serialize)]
struct TrajectoryResponse {
    success: bool,
    count: usize,
    data: Vec<Trajectory>,
}

async fn handle_trajectories(
    State(state): State<AppState>,
    Query(params): Query<TrajectoryParams>,
) -> Result<Json<TrajectoryResponse>, AppError> {
    let year = params.year.unwrap_or_else(|| Utc::now().year());
    let float = params.float.as_deref().filter(|f| !f.is_empty() && *f != "all");
    let data = floats::trajectories(&state.pool, year, float, Utc::now().naive_utc())
        .await
        .map_err(internal)?;
    Ok(Json(TrajectoryResponse {
        success: true,
        count: data.len(),
        data,
    }))
}
