//! HTTP API handlers: scan ingress, health, and Settings file I/O.
//!
//! Scan handlers validate the ref against the platform **before** enqueueing,
//! so an unknown ref is rejected synchronously; the queue-depth probe turns
//! capacity exhaustion into a 429 without touching the queue. No scan work
//! ever runs on the request-handling task.

use axum::{
    extract::{Json, Multipart, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::Config;
use crate::credentials;
use crate::error::ScanServerError;
use crate::fetch::Fetcher;
use crate::queue::JobQueue;
use crate::rules::RawRule;
use crate::types::{
    LocalScanJob, MultiScanRequest, MultiScanResponseItem, QueueItem, RefType, ScanJob,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Axum application state shared by every handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub queue: Arc<JobQueue>,
    pub fetcher: Arc<Fetcher>,
}

/// Map pipeline errors onto the ingress status contract.
fn error_response(err: ScanServerError) -> ApiError {
    match err {
        ScanServerError::Capacity => {
            (StatusCode::TOO_MANY_REQUESTS, Json(serde_json::json!({ "status": "queue_full" })))
        }
        ScanServerError::Validation(message) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "validation_failed", "message": message })),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "error", "message": other.to_string() })),
        ),
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(ScanServerError::Validation(message.into()))
}

// ---------------------------------------------------------------------------
// API-key middleware
// ---------------------------------------------------------------------------

/// Require `X-API-Key` on every endpoint, compared in constant time.
pub async fn require_api_key(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, Response> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    let valid: bool = provided.as_bytes().ct_eq(ctx.config.api_key.as_bytes()).into();
    if !valid {
        let body = Json(serde_json::json!({ "detail": "Invalid API key" }));
        return Err((StatusCode::UNAUTHORIZED, body).into_response());
    }
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn api_health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "queue_size": ctx.queue.depth(),
        "max_workers": ctx.config.max_workers,
        "active_workers": ctx.queue.active(),
    }))
}

// ---------------------------------------------------------------------------
// Scan ingress
// ---------------------------------------------------------------------------

/// `POST /scan` — validate the ref, then enqueue a single scan.
pub async fn api_scan(
    State(ctx): State<AppContext>,
    Json(job): Json<ScanJob>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let resolution = ctx.fetcher.resolve_ref(&job.repo_url, job.ref_type, &job.git_ref).await;
    let commit_id = match (resolution.exists, resolution.commit_id) {
        (true, Some(commit_id)) => commit_id,
        _ => {
            info!(
                project = job.project_name.as_str(),
                git_ref = job.git_ref.as_str(),
                message = resolution.message.as_str(),
                "Scan request rejected"
            );
            return Err(bad_request(resolution.message));
        }
    };

    enqueue(&ctx, QueueItem::Single { job: job.clone(), commit_id: commit_id.clone() })?;
    info!(project = job.project_name.as_str(), commit = commit_id.as_str(), "Scan queued");

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "commit": commit_id,
        "message": resolution.message,
    })))
}

/// `POST /multi_scan` — validate every ref up front, then enqueue one
/// sequential batch occupying a single queue slot.
pub async fn api_multi_scan(
    State(ctx): State<AppContext>,
    Json(request): Json<MultiScanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.repositories.is_empty() {
        return Err(bad_request("repositories list is empty"));
    }

    let mut commit_ids = Vec::with_capacity(request.repositories.len());
    let mut data = Vec::with_capacity(request.repositories.len());
    for job in &request.repositories {
        let resolution =
            ctx.fetcher.resolve_ref(&job.repo_url, job.ref_type, &job.git_ref).await;
        let commit_id = match (resolution.exists, resolution.commit_id) {
            (true, Some(commit_id)) => commit_id,
            _ => {
                return Err(bad_request(format!(
                    "{}: {}",
                    job.project_name, resolution.message
                )));
            }
        };
        data.push(MultiScanResponseItem {
            project_name: job.project_name.clone(),
            ref_type: job.ref_type,
            git_ref: job.git_ref.clone(),
            commit: commit_id.clone(),
        });
        commit_ids.push(commit_id);
    }

    enqueue(&ctx, QueueItem::Multi { jobs: request.repositories, commit_ids })?;
    info!(repositories = data.len(), "Multi-scan queued");

    Ok(Json(serde_json::json!({
        "status": "accepted",
        "message": "Multi-scan queued",
        "data": data,
    })))
}

/// `POST /local_scan` — multipart upload; the whole archive is read into
/// memory before enqueueing so the queue item owns the bytes.
pub async fn api_local_scan(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut project_name = None;
    let mut repo_url = String::new();
    let mut callback_url = None;
    let mut archive: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "ProjectName" => project_name = Some(field.text().await.map_err(multipart_err)?),
            "RepoUrl" => repo_url = field.text().await.map_err(multipart_err)?,
            "CallbackUrl" => callback_url = Some(field.text().await.map_err(multipart_err)?),
            "file" => archive = Some(field.bytes().await.map_err(multipart_err)?.to_vec()),
            other => {
                warn!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let local = LocalScanJob {
        project_name: project_name.ok_or_else(|| bad_request("ProjectName is required"))?,
        repo_url,
        callback_url: callback_url.ok_or_else(|| bad_request("CallbackUrl is required"))?,
    };
    let archive = archive.ok_or_else(|| bad_request("file is required"))?;
    if archive.is_empty() {
        return Err(bad_request("uploaded archive is empty"));
    }

    let job = ScanJob {
        project_name: local.project_name,
        repo_url: local.repo_url,
        ref_type: RefType::Commit,
        git_ref: "local".to_string(),
        callback_url: local.callback_url,
    };
    let size = archive.len();
    enqueue(&ctx, QueueItem::Local { job: job.clone(), archive: Arc::new(archive) })?;
    info!(project = job.project_name.as_str(), bytes = size, "Local scan queued");

    Ok(Json(serde_json::json!({ "status": "accepted", "commit": "local" })))
}

fn multipart_err(e: axum::extract::multipart::MultipartError) -> ApiError {
    bad_request(format!("malformed multipart field: {e}"))
}

fn enqueue(ctx: &AppContext, item: QueueItem) -> Result<(), ApiError> {
    ctx.queue.try_enqueue(item).map_err(error_response)
}

// ---------------------------------------------------------------------------
// Settings file I/O (thin glue; the catalog itself reloads only on restart)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FileContent {
    pub content: String,
}

#[derive(Deserialize)]
pub struct PatTokenRequest {
    pub token: String,
}

fn read_settings_file(path: &std::path::Path) -> Result<Json<serde_json::Value>, ApiError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Json(serde_json::json!({ "content": content }))),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        )),
    }
}

fn write_settings_file(
    path: &std::path::Path,
    content: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    std::fs::write(path, content).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        )
    })?;
    Ok(Json(serde_json::json!({
        "status": "updated",
        "note": "restart required to apply",
    })))
}

/// Parse the POSTed YAML as `T` before writing, so a bad payload can never
/// brick the next startup.
fn validate_yaml<T: serde::de::DeserializeOwned>(content: &str) -> Result<(), ApiError> {
    serde_yaml::from_str::<T>(content)
        .map(|_| ())
        .map_err(|e| bad_request(format!("invalid YAML: {e}")))
}

pub async fn api_get_rules(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>, ApiError> {
    read_settings_file(&ctx.config.rules_path())
}

pub async fn api_update_rules(
    State(ctx): State<AppContext>,
    Json(body): Json<FileContent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_yaml::<Vec<RawRule>>(&body.content)?;
    write_settings_file(&ctx.config.rules_path(), &body.content)
}

#[derive(Deserialize)]
struct ExcludedFilesShape {
    #[serde(rename = "excluded_files")]
    _excluded_files: Vec<String>,
}

#[derive(Deserialize)]
struct ExcludedExtensionsShape {
    #[serde(rename = "excluded_extensions")]
    _excluded_extensions: Vec<String>,
}

#[derive(Deserialize)]
struct FalsePositiveShape {
    #[serde(rename = "false_positive")]
    _false_positive: Vec<String>,
}

pub async fn api_get_excluded_files(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    read_settings_file(&ctx.config.excluded_files_path())
}

pub async fn api_update_excluded_files(
    State(ctx): State<AppContext>,
    Json(body): Json<FileContent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_yaml::<ExcludedFilesShape>(&body.content)?;
    write_settings_file(&ctx.config.excluded_files_path(), &body.content)
}

pub async fn api_get_excluded_extensions(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    read_settings_file(&ctx.config.excluded_extensions_path())
}

pub async fn api_update_excluded_extensions(
    State(ctx): State<AppContext>,
    Json(body): Json<FileContent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_yaml::<ExcludedExtensionsShape>(&body.content)?;
    write_settings_file(&ctx.config.excluded_extensions_path(), &body.content)
}

pub async fn api_get_false_positives(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    read_settings_file(&ctx.config.false_positive_path())
}

pub async fn api_update_false_positives(
    State(ctx): State<AppContext>,
    Json(body): Json<FileContent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_yaml::<FalsePositiveShape>(&body.content)?;
    write_settings_file(&ctx.config.false_positive_path(), &body.content)
}

/// Store a new PAT ciphertext under the configured key.
pub async fn api_update_pat_token(
    State(ctx): State<AppContext>,
    Json(body): Json<PatTokenRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(key) = ctx.config.pat_key.as_deref() else {
        return Err(bad_request("PAT_KEY is not configured"));
    };
    let path = ctx.config.settings_dir.join("pat_token.dat");
    credentials::encrypt_to_file(&body.token, &path, key).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "error", "message": e.to_string() })),
        )
    })?;
    Ok(Json(serde_json::json!({
        "status": "updated",
        "note": "restart required to apply",
    })))
}
