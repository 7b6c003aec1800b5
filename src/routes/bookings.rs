//! Booking HTTP endpoints.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is a JSON `ErrorBody`. Clients tell "space full" (409,
//! `E_SPACE_FULL`) apart from "try again" (503, `retryable: true`) by code.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use time::OffsetDateTime;
use wire::{Booking, BookingRequest};

use crate::error::ApiError;
use crate::routes::identity::UserId;
use crate::services::booking;
use crate::state::AppState;

pub async fn create_booking(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let start = body.start_time.unwrap_or_else(OffsetDateTime::now_utc);
    let end = body.end_time.unwrap_or(start + state.config.default_booking_duration);
    let booking = booking::book(&state, body.space_id, &user_id, start, end).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(booking_id): Path<i64>,
) -> Result<Json<Booking>, ApiError> {
    let existing = state
        .bookings
        .get(booking_id)
        .await
        .map_err(booking::BookingError::from)?;
    if existing.is_some_and(|b| b.user_id != user_id) {
        return Err(ApiError::forbidden("booking belongs to another user"));
    }
    let booking = booking::cancel(&state, booking_id).await?;
    Ok(Json(booking))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = booking::list_for_user(&state, &user_id).await?;
    Ok(Json(bookings))
}

#[cfg(test)]
#[path = "bookings_test.rs"]
mod tests;
