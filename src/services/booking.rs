//! Booking mutator — the only path that changes seat counts for bookings.
//!
//! DESIGN
//! ======
//! A booking is a seat reservation first and a stored record second: the
//! registry delta is applied atomically, then the record is written. If the
//! write fails after bounded retries, the seat is handed back with a
//! compensating delta. Observers may see the decrement and the restore as
//! two changes, but the final state never holds a seat without a booking.
//!
//! Cancellation runs the other way round. The store flips the status from
//! confirmed to cancelled in one conditional update, and only the caller
//! that won that flip returns the seat.
//!
//! Every store write is keyed (a request id per booking attempt, a token
//! per cancel), so a retry after a lost reply finds the first attempt's
//! effect instead of repeating or missing it.
//!
//! ERROR HANDLING
//! ==============
//! Capacity and lookup failures are permanent and surface immediately.
//! Connection-level store failures are retried and surface as `Unavailable`
//! (retryable) once retries are spent. Any other store failure surfaces as
//! `Store` and is not retried.

use std::future::Future;

use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;
use wire::{Booking, Space};

use crate::config::RetryPolicy;
use crate::error::ErrorCode;
use crate::services::persistence::{self, PersistenceError};
use crate::services::registry::RegistryError;
use crate::services::store::{CancelOutcome, NewBooking, StoreError};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("space {0} has no available seats")]
    SpaceFull(i64),
    #[error("space not found: {0}")]
    SpaceNotFound(i64),
    #[error("booking not found: {0}")]
    NotFound(i64),
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(i64),
    #[error("booking window must end after it starts")]
    InvalidWindow { start: OffsetDateTime, end: OffsetDateTime },
    #[error("seat could not be returned: {0}")]
    SeatRelease(RegistryError),
    #[error("booking store unavailable: {0}")]
    Unavailable(StoreError),
    #[error("booking store failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() { Self::Unavailable(e) } else { Self::Store(e) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdjustError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("seat adjustment not persisted: {0}")]
    Persistence(PersistenceError),
}

impl ErrorCode for AdjustError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Registry(e) => e.error_code(),
            Self::Persistence(_) => "E_UNAVAILABLE",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        match self {
            Self::Registry(e) => e.status(),
            Self::Persistence(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl ErrorCode for BookingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SpaceFull(_) => "E_SPACE_FULL",
            Self::SpaceNotFound(_) => "E_SPACE_NOT_FOUND",
            Self::NotFound(_) => "E_BOOKING_NOT_FOUND",
            Self::AlreadyCancelled(_) => "E_ALREADY_CANCELLED",
            Self::InvalidWindow { .. } => "E_INVALID_WINDOW",
            Self::SeatRelease(_) => "E_CAPACITY_VIOLATION",
            Self::Unavailable(_) => "E_UNAVAILABLE",
            Self::Store(_) => "E_STORE_FAILED",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SpaceFull(_) | Self::AlreadyCancelled(_) | Self::SeatRelease(_) => StatusCode::CONFLICT,
            Self::SpaceNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidWindow { .. } => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Reserve one seat in `space_id` for `user_id` over `[start, end)`.
///
/// # Errors
///
/// - [`BookingError::InvalidWindow`] unless `end > start`; nothing changes
/// - [`BookingError::SpaceNotFound`] / [`BookingError::SpaceFull`] from the registry
/// - [`BookingError::Unavailable`] / [`BookingError::Store`] if the record could not be
///   stored; the seat is restored
pub async fn book(
    state: &AppState,
    space_id: i64,
    user_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Booking, BookingError> {
    if end <= start {
        return Err(BookingError::InvalidWindow { start, end });
    }

    let space = state.registry.apply_seat_delta(space_id, -1).await.map_err(|e| match e {
        RegistryError::NotFound(id) => BookingError::SpaceNotFound(id),
        RegistryError::CapacityViolation { .. } | RegistryError::InvalidDelta => {
            info!(space_id, user_id, "booking rejected; space full");
            BookingError::SpaceFull(space_id)
        }
    })?;

    let new = NewBooking {
        request_id: Uuid::new_v4(),
        space_id,
        user_id: user_id.to_owned(),
        start_time: start,
        end_time: end,
    };
    match with_retry(state.config.store_retry, "insert booking", || state.bookings.insert(&new)).await {
        Ok(booking) => {
            info!(booking_id = booking.id, space_id, user_id, available = space.available_seats, "booking confirmed");
            Ok(booking)
        }
        Err(e) => {
            warn!(error = %e, space_id, user_id, "booking store failed; returning seat");
            if let Err(restore) = state.registry.apply_seat_delta(space_id, 1).await {
                error!(error = %restore, space_id, "failed to return seat after store failure");
            }
            Err(e.into())
        }
    }
}

/// Cancel a confirmed booking and return its seat.
///
/// # Errors
///
/// - [`BookingError::NotFound`] / [`BookingError::AlreadyCancelled`]; nothing changes
/// - [`BookingError::SeatRelease`] if the space cannot take the seat back; the
///   booking stays confirmed
/// - [`BookingError::Unavailable`] / [`BookingError::Store`] on store failure
pub async fn cancel(state: &AppState, booking_id: i64) -> Result<Booking, BookingError> {
    let token = Uuid::new_v4();
    let outcome = with_retry(state.config.store_retry, "cancel booking", || {
        state.bookings.cancel_if_confirmed(booking_id, token)
    })
    .await?;

    let booking = match outcome {
        CancelOutcome::Cancelled(booking) => booking,
        CancelOutcome::AlreadyCancelled(_) => return Err(BookingError::AlreadyCancelled(booking_id)),
        CancelOutcome::NotFound => return Err(BookingError::NotFound(booking_id)),
    };

    match state.registry.apply_seat_delta(booking.space_id, 1).await {
        Ok(space) => {
            info!(booking_id, space_id = space.id, available = space.available_seats, "booking cancelled");
            Ok(booking)
        }
        Err(e) => {
            warn!(error = %e, booking_id, space_id = booking.space_id, "seat release rejected; reverting cancel");
            if let Err(revert) =
                with_retry(state.config.store_retry, "revert cancel", || state.bookings.revert_cancel(booking_id)).await
            {
                error!(error = %revert, booking_id, "failed to revert cancel");
            }
            Err(BookingError::SeatRelease(e))
        }
    }
}

/// Bookings of `user_id`, newest first.
///
/// # Errors
///
/// Returns [`BookingError::Unavailable`] / [`BookingError::Store`] on store failure.
pub async fn list_for_user(state: &AppState, user_id: &str) -> Result<Vec<Booking>, BookingError> {
    Ok(with_retry(state.config.store_retry, "list bookings", || state.bookings.list_for_user(user_id)).await?)
}

/// Administrative seat correction. Bypasses bookings but not seat bounds.
///
/// With a database the correction is recorded as held seats before the
/// call returns; if that write fails the registry change is undone.
///
/// # Errors
///
/// - [`AdjustError::Registry`] for unknown spaces, zero deltas and bound violations
/// - [`AdjustError::Persistence`] if the correction could not be recorded
pub async fn adjust_seats(state: &AppState, space_id: i64, delta: i32) -> Result<Space, AdjustError> {
    let space = state.registry.apply_seat_delta(space_id, delta).await?;

    if let Some(pool) = &state.pool {
        if let Err(e) = persistence::record_seat_adjustment(pool, space_id, delta).await {
            warn!(error = %e, space_id, delta, "seat adjustment not persisted; undoing");
            if let Err(undo) = state.registry.apply_seat_delta(space_id, -delta).await {
                error!(error = %undo, space_id, "failed to undo seat adjustment");
            }
            return Err(AdjustError::Persistence(e));
        }
    }

    info!(space_id, delta, available = space.available_seats, "seats adjusted");
    Ok(space)
}

// =============================================================================
// RETRY
// =============================================================================

pub(crate) async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: &'static str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                warn!(error = %e, op, attempt, "booking store call failed; retrying");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "booking_test.rs"]
mod tests;
