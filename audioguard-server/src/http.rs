//! AudioGuard HTTP REST API
//!
//! Axum-based HTTP server that accepts audio uploads, runs them through the
//! detection pipeline and reports per-session quota.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery.
//!
//! Endpoints:
//! - GET  /health           : health check with result store status
//! - GET  /version          : server version info
//! - GET  /api/check-upload : session upload history and remaining quota
//! - POST /api/upload       : multipart upload (field `audio`) and classification

use std::net::SocketAddr;
use std::sync::Arc;

use audioguard_core::error::{AudioGuardError, UploadError, ValidationError};
use audioguard_core::orchestrator::{UploadOrchestrator, UploadRequest};
use audioguard_core::quota::QuotaTracker;
use audioguard_core::store::ResultStore;
use audioguard_core::{AppConfig, AudioFile, SessionStore};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::session_cookie;

/// Headroom above the file ceiling for multipart boundaries and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<UploadOrchestrator>,
    pub sessions: Arc<dyn SessionStore>,
    /// Cancelled on server shutdown; each upload polls under a child token.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let body_limit = state
        .config
        .upload
        .max_file_size_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/check-upload", get(check_upload_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the state's shutdown token is cancelled.
pub async fn start_http_server(state: Arc<HttpState>) -> Result<(), AudioGuardError> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let shutdown = state.shutdown.clone();

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("AudioGuard HTTP API listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        tracing::info!("HTTP server shutting down...");
    })
    .await?;

    Ok(())
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CheckUploadResponse {
    #[serde(rename = "hasUploaded")]
    pub has_uploaded: bool,
    #[serde(rename = "uploadsRemaining")]
    pub uploads_remaining: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "ISAI")]
    pub is_ai: bool,
    /// Passed through exactly as the detection service reported it.
    pub confidence: serde_json::Number,
    #[serde(rename = "uploadsRemaining")]
    pub uploads_remaining: Option<u32>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            details: None,
        }
    }
}

fn json_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: probes the result store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn ResultStore) -> (StatusCode, serde_json::Value) {
    match store.health().await {
        Ok(info) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.name(),
                "store_info": info,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "store": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "audioguard",
    })
}

/// Inner check-upload: upload history and remaining quota for one session.
pub async fn check_upload_inner(
    quota: &QuotaTracker,
    session_id: &str,
) -> (StatusCode, serde_json::Value) {
    let counted = quota.count_uploads(session_id).await;
    let remaining = quota.remaining(session_id).await;

    match (counted, remaining) {
        (Ok(count), Ok(uploads_remaining)) => (
            StatusCode::OK,
            json_value(&CheckUploadResponse {
                has_uploaded: count > 0,
                uploads_remaining,
            }),
        ),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(session_id, error = %e, "Failed to read upload count");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json_value(&ErrorResponse::new("Failed to check upload status")),
            )
        }
    }
}

/// Inner upload: runs the orchestrator and maps the outcome onto HTTP.
pub async fn upload_inner(
    orchestrator: &UploadOrchestrator,
    request: UploadRequest,
    cancel: &CancellationToken,
) -> (StatusCode, serde_json::Value) {
    match orchestrator.process(request, cancel).await {
        Ok(outcome) => (
            StatusCode::OK,
            json_value(&UploadResponse {
                is_ai: outcome.result.is_ai,
                confidence: outcome.result.confidence,
                uploads_remaining: outcome.uploads_remaining,
            }),
        ),
        Err(e) => upload_error_response(&e),
    }
}

/// Validation → 400, quota → 403, everything else → 500.
pub fn upload_error_response(err: &UploadError) -> (StatusCode, serde_json::Value) {
    match err {
        UploadError::Validation(v) => (
            StatusCode::BAD_REQUEST,
            json_value(&ErrorResponse::new(v.to_string())),
        ),
        UploadError::QuotaExceeded(q) => (
            StatusCode::FORBIDDEN,
            serde_json::json!({
                "error": q.to_string(),
                "uploadsRemaining": 0,
            }),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json_value(&ErrorResponse {
                error: other.to_string(),
                details: other.details(),
            }),
        ),
    }
}

/// Pull the audio field out of a multipart body. Other fields are ignored.
pub async fn read_audio_field(
    mut multipart: Multipart,
    field_name: &str,
) -> Result<Option<AudioFile>, ValidationError> {
    let mut file: Option<AudioFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ValidationError::Multipart(e.body_text()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        if file.is_some() {
            return Err(ValidationError::Multipart(format!(
                "send exactly one field named '{}'",
                field_name
            )));
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ValidationError::Multipart(e.body_text()))?;

        file = Some(AudioFile {
            file_name,
            content_type,
            data,
        });
    }

    Ok(file)
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

/// Attach a freshly issued session cookie, if any.
fn with_cookie(
    status: StatusCode,
    body: serde_json::Value,
    cookie: Option<(axum::http::HeaderName, axum::http::HeaderValue)>,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some((name, value)) = cookie {
        response.headers_mut().insert(name, value);
    }
    response
}

fn session_failure(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Session store unavailable");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Session unavailable")),
    )
        .into_response()
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.orchestrator.store().as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

#[tracing::instrument(skip_all)]
pub async fn check_upload_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Response {
    let secure = state.config.service.is_production();
    let (session, cookie) = match session_cookie::resolve_session(
        state.sessions.as_ref(),
        &state.config.session,
        &headers,
        secure,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => return session_failure(e),
    };

    let (status, body) = check_upload_inner(state.orchestrator.quota(), &session.id).await;
    with_cookie(status, body, cookie)
}

#[tracing::instrument(skip_all)]
pub async fn upload_handler(
    State(state): State<Arc<HttpState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let secure = state.config.service.is_production();
    let (session, cookie) = match session_cookie::resolve_session(
        state.sessions.as_ref(),
        &state.config.session,
        &headers,
        secure,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => return session_failure(e),
    };

    let file = match multipart {
        Ok(multipart) => read_audio_field(multipart, &state.config.upload.form_field).await,
        Err(rejection) => Err(ValidationError::Multipart(rejection.body_text())),
    };
    let file = match file {
        Ok(f) => f,
        Err(e) => {
            let (status, body) = upload_error_response(&UploadError::Validation(e));
            return with_cookie(status, body, cookie);
        }
    };

    let request = UploadRequest {
        session_id: session.id.clone(),
        ip_address: session_cookie::client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        file,
    };

    // Dropping this handler (client went away) cancels the in-flight poll.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let (status, body) = upload_inner(&state.orchestrator, request, &cancel).await;
    with_cookie(status, body, cookie)
}

// ============================================================================
// Unit Tests (inner functions called directly)
// ============================================================================
