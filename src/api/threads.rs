use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ApiError, AppState, CallerId, parse_id};
use crate::agent::thread::ThreadSummary;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct ListThreadsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /agent/threads
pub(super) async fn list_threads(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(query): Query<ListThreadsQuery>,
) -> Result<Json<Vec<ThreadSummary>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);
    let threads = state.db.list_threads(&user_id, limit, offset).await?;
    Ok(Json(threads))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteThreadQuery {
    thread_id: String,
}

/// DELETE /agent/threads?threadId=…
pub(super) async fn delete_thread(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(query): Query<DeleteThreadQuery>,
) -> Result<Json<Value>, ApiError> {
    let thread_id = parse_id(&query.thread_id, "thread")?;
    let deleted = state
        .db
        .delete_thread_turns(thread_id, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Thread not found"))?;
    info!(thread_id = %thread_id, deleted, "Thread history deleted");
    Ok(Json(json!({ "deleted": deleted })))
}

/// POST /agent/threads/{id}/archive
pub(super) async fn archive_thread(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let thread_id = parse_id(&id, "thread")?;
    if !state.db.archive_thread(thread_id, &user_id).await? {
        return Err(ApiError::not_found("Thread not found"));
    }
    Ok(Json(json!({ "threadId": thread_id, "status": "archived" })))
}
