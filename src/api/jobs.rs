//! Job status, cancellation, manual retry and the internal drain endpoint.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::{ApiError, AppState, CallerId, INTERNAL_SECRET_HEADER, parse_id};
use crate::config::ServerConfig;
use crate::jobs::Job;

const DEFAULT_MAX_JOBS: i64 = 10;
const MAX_JOBS_LIMIT: i64 = 50;

/// GET /agent/jobs/{id}
pub(super) async fn get_job(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_id(&id, "job")?;
    state
        .db
        .get_job(id)
        .await?
        .filter(|job| job.user_id == user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// DELETE /agent/jobs/{id}
pub(super) async fn cancel_job(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id, "job")?;
    let not_cancellable = || ApiError::not_found("Job not found or cannot be cancelled");
    let job = state
        .db
        .get_job(id)
        .await?
        .filter(|job| job.user_id == user_id)
        .ok_or_else(not_cancellable)?;
    if !job.status.is_cancellable() {
        debug!(job_id = %id, status = %job.status, "Refusing to cancel job");
        return Err(not_cancellable());
    }
    // A poll loop may start the job between the read and the update.
    if !state.db.cancel_job(id, &user_id).await? {
        return Err(not_cancellable());
    }
    info!(job_id = %id, "Job cancelled");
    Ok(Json(json!({ "jobId": id, "status": "cancelled" })))
}

#[derive(Debug, Deserialize)]
pub(super) struct JobActionRequest {
    action: String,
}

/// PATCH /agent/jobs/{id}
pub(super) async fn update_job(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
    Json(request): Json<JobActionRequest>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_id(&id, "job")?;
    match request.action.as_str() {
        "retry" => {
            if !state.db.retry_failed_job(id, &user_id).await? {
                return Err(ApiError::not_found("Job not found or not failed"));
            }
            info!(job_id = %id, "Job requeued by user");
            state
                .db
                .get_job(id)
                .await?
                .map(Json)
                .ok_or_else(|| ApiError::not_found("Job not found"))
        }
        other => Err(ApiError::bad_request(format!("Unknown action: {other}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    #[serde(default)]
    max_jobs: Option<i64>,
}

/// POST /agent/jobs/process
///
/// Drains up to `maxJobs` jobs across all worker types. The body is optional.
pub(super) async fn process_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize_internal(&headers, &state.config)?;

    let request: ProcessRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };
    let max_jobs = request.max_jobs.unwrap_or(DEFAULT_MAX_JOBS);
    if !(1..=MAX_JOBS_LIMIT).contains(&max_jobs) {
        return Err(ApiError::bad_request(format!(
            "maxJobs must be between 1 and {MAX_JOBS_LIMIT}"
        )));
    }

    let processed = state.processor.process_all(max_jobs as usize).await;
    Ok(Json(json!({ "processed": processed })))
}

fn authorize_internal(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ApiError> {
    if !config.environment.is_production() {
        return Ok(());
    }
    let provided = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    match (&config.internal_secret, provided) {
        (Some(secret), Some(provided))
            if bool::from(secret.expose_secret().as_bytes().ct_eq(provided.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid internal secret",
        )),
    }
}
