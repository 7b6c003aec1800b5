//! Booking store — durable booking records behind a trait seam.
//!
//! DESIGN
//! ======
//! The booking mutator talks to [`BookingStore`] only. `PgBookingStore` is
//! used when `DATABASE_URL` is set; `MemoryBookingStore` otherwise and in
//! tests. Cancellation is a single conditional update so two concurrent
//! cancels of the same booking cannot both succeed.
//!
//! Both writes are idempotent under retry. An insert carries a caller
//! generated `request_id`, and a repeated insert with the same id returns
//! the row the first one created. A cancel carries a `token`; if the flip
//! already happened under that token, the repeat reports `Cancelled` again
//! so the caller still returns the seat exactly once.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;
use wire::{Booking, BookingStatus};

// =============================================================================
// TYPES
// =============================================================================

/// Booking fields supplied by the caller; the store assigns id, status and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Idempotency key; one per logical booking attempt.
    pub request_id: Uuid,
    pub space_id: i64,
    pub user_id: String,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
}

/// Result of a conditional cancel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The booking was confirmed and is now cancelled.
    Cancelled(Booking),
    /// The booking exists but was already cancelled.
    AlreadyCancelled(Booking),
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt booking row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("booking store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed. Only connection-level
    /// failures qualify; constraint violations and bad rows never do.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) | Self::Unavailable(_))
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Persist a new confirmed booking. Repeating `request_id` returns the
    /// booking created by the first call.
    async fn insert(&self, booking: &NewBooking) -> Result<Booking, StoreError>;

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, StoreError>;

    /// Move a booking from confirmed to cancelled in one atomic step. A
    /// booking already cancelled under the same `token` is `Cancelled`.
    async fn cancel_if_confirmed(&self, booking_id: i64, token: Uuid) -> Result<CancelOutcome, StoreError>;

    /// Undo a cancellation whose seat could not be returned.
    async fn revert_cancel(&self, booking_id: i64) -> Result<(), StoreError>;

    /// Bookings of one user, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    bookings: BTreeMap<i64, Booking>,
    requests: BTreeMap<Uuid, i64>,
    cancel_tokens: BTreeMap<i64, Uuid>,
    next_id: i64,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBookingStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryBookingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn insert(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.requests.get(&booking.request_id).and_then(|id| inner.bookings.get(id)) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let record = Booking {
            id: inner.next_id,
            space_id: booking.space_id,
            user_id: booking.user_id.clone(),
            start_time: booking.start_time,
            end_time: booking.end_time,
            status: BookingStatus::Confirmed,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.bookings.insert(record.id, record.clone());
        inner.requests.insert(booking.request_id, record.id);
        Ok(record)
    }

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock()?.bookings.get(&booking_id).cloned())
    }

    async fn cancel_if_confirmed(&self, booking_id: i64, token: Uuid) -> Result<CancelOutcome, StoreError> {
        let mut inner = self.lock()?;
        let same_token = inner.cancel_tokens.get(&booking_id) == Some(&token);
        let Some(booking) = inner.bookings.get_mut(&booking_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if booking.status == BookingStatus::Cancelled {
            let booking = booking.clone();
            let outcome =
                if same_token { CancelOutcome::Cancelled(booking) } else { CancelOutcome::AlreadyCancelled(booking) };
            return Ok(outcome);
        }
        booking.status = BookingStatus::Cancelled;
        let booking = booking.clone();
        inner.cancel_tokens.insert(booking_id, token);
        Ok(CancelOutcome::Cancelled(booking))
    }

    async fn revert_cancel(&self, booking_id: i64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(booking) = inner.bookings.get_mut(&booking_id) {
            booking.status = BookingStatus::Confirmed;
        }
        inner.cancel_tokens.remove(&booking_id);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.bookings.values().rev().filter(|b| b.user_id == user_id).cloned().collect())
    }
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    space_id: i64,
    user_id: String,
    start_time: OffsetDateTime,
    end_time: OffsetDateTime,
    status: String,
    created_at: OffsetDateTime,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt { id: row.id, reason: format!("unknown status {:?}", row.status) })?;
        Ok(Self {
            id: row.id,
            space_id: row.space_id,
            user_id: row.user_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status,
            created_at: row.created_at,
        })
    }
}

/// A booking row plus the token of the cancel that flipped it, if any.
#[derive(sqlx::FromRow)]
struct CancelRow {
    #[sqlx(flatten)]
    booking: BookingRow,
    cancel_token: Option<Uuid>,
}

const BOOKING_COLUMNS: &str = "id, space_id, user_id, start_time, end_time, status, created_at";

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let inserted = sqlx::query_as::<_, BookingRow>(&format!(
            "INSERT INTO bookings (request_id, space_id, user_id, start_time, end_time, status)
             VALUES ($1, $2, $3, $4, $5, 'confirmed')
             ON CONFLICT (request_id) DO NOTHING
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking.request_id)
        .bind(booking.space_id)
        .bind(&booking.user_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .fetch_optional(&self.pool)
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                let select = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE request_id = $1");
                sqlx::query_as::<_, BookingRow>(&select).bind(booking.request_id).fetch_one(&self.pool).await?
            }
        };
        row.try_into()
    }

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn cancel_if_confirmed(&self, booking_id: i64, token: Uuid) -> Result<CancelOutcome, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings SET status = 'cancelled', cancelled_at = now(), cancel_token = $2
             WHERE id = $1 AND status = 'confirmed'
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(CancelOutcome::Cancelled(row.try_into()?));
        }

        let existing = sqlx::query_as::<_, CancelRow>(&format!(
            "SELECT {BOOKING_COLUMNS}, cancel_token FROM bookings WHERE id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(existing) = existing else {
            return Ok(CancelOutcome::NotFound);
        };
        let same_token = existing.cancel_token == Some(token);
        let booking = Booking::try_from(existing.booking)?;
        if same_token && booking.status == BookingStatus::Cancelled {
            return Ok(CancelOutcome::Cancelled(booking));
        }
        Ok(CancelOutcome::AlreadyCancelled(booking))
    }

    async fn revert_cancel(&self, booking_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bookings SET status = 'confirmed', cancelled_at = NULL, cancel_token = NULL
             WHERE id = $1 AND status = 'cancelled'",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Booking::try_from).collect()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
