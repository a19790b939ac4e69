use axum::Json;
use axum::extract::State;

use super::{ApiError, AppState, CallerId};
use crate::agent::{InteractRequest, InteractResponse};

/// POST /agent/interact
pub(super) async fn interact(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<InteractRequest>,
) -> Result<Json<InteractResponse>, ApiError> {
    let response = state.orchestrator.interact(&user_id, request).await?;
    Ok(Json(response))
}
