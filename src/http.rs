//! HTTP surface: `/health`, `/backends`, `/convert` and `/convert/{backend}`.

use crate::config::Config;
use crate::error::{ConvertError, ErrorKind};
use crate::orchestrator::{ConversionOutcome, ConversionRequest, Orchestrator, Stage};
use crate::registry::BackendStatus;
use crate::util::now_rfc3339;
use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{error, info};

const FILE_FIELD: &str = "file";
/// Slack on top of the file limit for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const X_BACKEND: HeaderName = HeaderName::from_static("x-backend");
const X_ARCHIVE_SHA256: HeaderName = HeaderName::from_static("x-archive-sha256");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/backends", get(list_backends))
        .route("/convert", post(convert_default))
        .route("/convert/{backend}", post(convert_named))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .with_state(state)
}

pub async fn serve(cfg: &Config, orchestrator: Arc<Orchestrator>, bind: &str) -> Result<()> {
    let state = AppState::new(orchestrator, cfg.server.max_concurrent_conversions);
    let app = router(state, cfg.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "serving HTTP")?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    time: String,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        time: now_rfc3339(),
    })
}

async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendStatus>> {
    let registry = state.orchestrator.registry().clone();
    // Probing stats the filesystem; keep it off the async workers.
    let joined = tokio::task::spawn_blocking(move || registry.describe(false)).await;
    Json(probed_statuses(joined))
}

fn probed_statuses(joined: Result<Vec<BackendStatus>, JoinError>) -> Vec<BackendStatus> {
    match joined {
        Ok(statuses) => statuses,
        Err(err) => {
            error!("backend probe task failed: {err}");
            Vec::new()
        }
    }
}

async fn convert_default(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    convert(state, None, multipart).await
}

async fn convert_named(
    State(state): State<AppState>,
    Path(backend): Path<String>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    convert(state, Some(backend), multipart).await
}

async fn convert(
    state: AppState,
    backend: Option<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("invalid multipart payload", err.to_string()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let filename = field.file_name().unwrap_or("upload.pptx").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request("failed to read upload", err.to_string()))?;
            upload = Some((filename, data));
            break;
        }
    }
    let (filename, data) = upload.ok_or_else(|| {
        ApiError::bad_request("missing file", format!("expected a multipart field named `{FILE_FIELD}`"))
    })?;

    let permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;

    let request = ConversionRequest {
        filename,
        content: data.to_vec(),
        backend,
    };
    let orchestrator = state.orchestrator.clone();
    // The blocking task owns the workspace for its whole life, so a client
    // that disconnects mid-conversion cannot skip the cleanup.
    let outcome = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        orchestrator.run(request)
    })
    .await
    .map_err(|err| ApiError::internal(format!("conversion task failed: {err}")))??;

    tracing::debug!(request_id = %outcome.request_id, stage = %Stage::Responded, "stage");
    Ok(zip_response(outcome))
}

fn zip_response(outcome: ConversionOutcome) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        ascii_filename(&outcome.filename)
    );
    let mut response = outcome.archive.bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(v) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    headers.insert(X_BACKEND, HeaderValue::from_static(outcome.backend.as_str()));
    if let Ok(v) = HeaderValue::from_str(&outcome.archive.sha256) {
        headers.insert(X_ARCHIVE_SHA256, v);
    }
    if let Ok(v) = HeaderValue::from_str(&outcome.request_id.to_string()) {
        headers.insert(X_REQUEST_ID, v);
    }
    response
}

/// Header-safe variant of a filename: anything outside printable ASCII,
/// plus quotes and backslashes, becomes `_`.
fn ascii_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    fn bad_request(message: &str, detail: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.to_string(),
            detail: Some(detail),
        }
    }

    fn internal(detail: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: ErrorKind::InternalError.code(),
            message: "internal server error".to_string(),
            detail: Some(detail),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownBackend | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::ToolNotAvailable | ErrorKind::LicenseMissing => StatusCode::FAILED_DEPENDENCY,
        ErrorKind::ConversionFailed | ErrorKind::NoOutputProduced => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ConvertError> for ApiError {
    fn from(err: ConvertError) -> Self {
        let kind = err.kind();
        // Internal errors carry host paths; keep those in the logs only.
        let message = match kind {
            ErrorKind::InternalError => "internal server error".to_string(),
            _ => err.to_string(),
        };
        Self {
            status: status_for(kind),
            code: kind.code(),
            message,
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                detail: self.detail,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(ErrorKind::UnknownBackend), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::ToolNotAvailable), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(status_for(ErrorKind::ConversionFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(ErrorKind::InternalError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn panicked_probe_task_lists_no_backends() {
        let joined = tokio::task::spawn_blocking(|| -> Vec<BackendStatus> {
            panic!("probe blew up")
        })
        .await;
        assert!(joined.is_err());
        assert!(probed_statuses(joined).is_empty());
    }

    #[test]
    fn ascii_filename_replaces_unsafe_chars() {
        assert_eq!(ascii_filename("conversion_Caf\u{e9}.zip"), "conversion_Caf_.zip");
        assert_eq!(ascii_filename("a\"b.zip"), "a_b.zip");
        assert_eq!(ascii_filename("q3 plan.zip"), "q3 plan.zip");
    }
}
