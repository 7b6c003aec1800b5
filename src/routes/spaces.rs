//! Space read endpoints and the administrative seat correction.
//!
//! `GET /api/spaces` is the pull-based fallback for clients without a live
//! channel. It returns the same records a SNAPSHOT would, with the state
//! version in the `x-state-version` header.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use wire::{STATE_VERSION_HEADER, SeatAdjustment, Space};

use crate::error::ApiError;
use crate::routes::identity::AdminAuth;
use crate::services::booking;
use crate::state::AppState;

pub async fn list_spaces(State(state): State<AppState>) -> impl IntoResponse {
    let (spaces, version) = state.registry.get_all().await;
    ([(STATE_VERSION_HEADER, version.to_string())], Json(spaces))
}

pub async fn get_space(State(state): State<AppState>, Path(space_id): Path<i64>) -> Result<Json<Space>, ApiError> {
    state
        .registry
        .get(space_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("space not found: {space_id}")))
}

pub async fn adjust_seats(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(space_id): Path<i64>,
    Json(body): Json<SeatAdjustment>,
) -> Result<Json<Space>, ApiError> {
    let space = booking::adjust_seats(&state, space_id, body.delta).await?;
    Ok(Json(space))
}
