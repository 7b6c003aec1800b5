//! Favorite HTTP endpoints. Every route acts on the caller's own shortlist.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use wire::{Favorite, FavoriteRequest};

use crate::error::ApiError;
use crate::routes::identity::UserId;
use crate::services::favorites;
use crate::state::AppState;

pub async fn list_favorites(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<Favorite>>, ApiError> {
    Ok(Json(favorites::list_for_user(&state, &user_id).await?))
}

/// `201 Created` for a new favorite, `200 OK` if the space was already one.
pub async fn add_favorite(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<FavoriteRequest>,
) -> Result<(StatusCode, Json<Favorite>), ApiError> {
    let (favorite, created) = favorites::add(&state, &user_id, body.space_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(favorite)))
}

pub async fn remove_favorite(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(space_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    favorites::remove(&state, &user_id, space_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "favorites_test.rs"]
mod tests;
