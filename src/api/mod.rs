//! HTTP surface: router, shared state, caller identity and error mapping.

mod interact;
mod jobs;
mod threads;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::agent::Orchestrator;
use crate::config::ServerConfig;
use crate::error::{DatabaseError, InteractError};
use crate::jobs::JobProcessor;
use crate::store::Database;

/// Header carrying the authenticated caller.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the shared secret for internal endpoints.
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub orchestrator: Arc<Orchestrator>,
    pub processor: Arc<JobProcessor>,
    pub config: Arc<ServerConfig>,
}

/// Build the router with every agent endpoint.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/agent/interact", post(interact::interact))
        .route("/agent/jobs/process", post(jobs::process_jobs))
        .route(
            "/agent/jobs/{id}",
            get(jobs::get_job)
                .delete(jobs::cancel_job)
                .patch(jobs::update_job),
        )
        .route(
            "/agent/threads",
            get(threads::list_threads).delete(threads::delete_thread),
        )
        .route("/agent/threads/{id}/archive", post(threads::archive_thread))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "planner-agent"
    }))
}

/// Caller identity taken from the `x-user-id` header.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(v.to_string()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing x-user-id header"))
    }
}

/// An error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        error!(error = %e, "Database error while handling request");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl From<InteractError> for ApiError {
    fn from(e: InteractError) -> Self {
        Self::bad_request(e.to_string())
    }
}

/// Parse a path or query id, rejecting malformed values with 400.
fn parse_id(raw: &str, what: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(raw.trim()).map_err(|_| ApiError::bad_request(format!("Invalid {what} ID")))
}
