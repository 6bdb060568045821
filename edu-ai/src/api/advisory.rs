//! Advisory session API handlers
//!
//! POST /advisory/:slot, GET /advisory/:slot, DELETE /advisory/:slot

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use edu_common::events::{FeatureSlot, SessionState};
use serde::Serialize;
use uuid::Uuid;

use crate::advisory::{AdvisoryRequest, AdvisorySession};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /advisory/:slot response
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub slot: FeatureSlot,
    pub state: SessionState,
}

/// DELETE /advisory/:slot response
#[derive(Debug, Serialize)]
pub struct CancelSessionResponse {
    pub session_id: Uuid,
    pub slot: FeatureSlot,
}

fn parse_slot(name: &str) -> ApiResult<FeatureSlot> {
    FeatureSlot::parse(name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown advisory slot: {}", name)))
}

/// POST /advisory/:slot
///
/// Start a session, superseding any session still running in the slot.
/// Returns 202 Accepted with the session ID; results arrive over SSE and
/// GET /advisory/:slot.
pub async fn start_session(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    Json(request): Json<AdvisoryRequest>,
) -> ApiResult<(StatusCode, Json<StartSessionResponse>)> {
    let slot = parse_slot(&slot)?;
    request.validate()?;

    let handle = state.registry.start(slot, request).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartSessionResponse {
            session_id: handle.session_id,
            slot,
            state: handle.cell.state(),
        }),
    ))
}

/// GET /advisory/:slot
pub async fn get_session(
    State(state): State<AppState>,
    Path(slot): Path<String>,
) -> ApiResult<Json<AdvisorySession>> {
    let slot = parse_slot(&slot)?;
    state
        .registry
        .current(slot)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No session for slot {}", slot.as_str())))
}

/// DELETE /advisory/:slot
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(slot): Path<String>,
) -> ApiResult<Json<CancelSessionResponse>> {
    let slot = parse_slot(&slot)?;
    let session_id = state.registry.cancel(slot).await.ok_or_else(|| {
        ApiError::NotFound(format!("No active session for slot {}", slot.as_str()))
    })?;

    Ok(Json(CancelSessionResponse { session_id, slot }))
}

/// Build advisory session routes
pub fn advisory_routes() -> Router<AppState> {
    Router::new().route(
        "/advisory/:slot",
        get(get_session).post(start_session).delete(cancel_session),
    )
}
