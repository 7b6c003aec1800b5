//! Persistence service — space hydration and background seat flush.
//!
//! DESIGN
//! ======
//! Seat counts live in memory; Postgres is a write-behind copy. At startup
//! the `spaces` table is loaded, or seeded from the catalog when empty. A
//! background task then writes dirty seat counts every
//! `SEAT_FLUSH_INTERVAL_MS`, and shutdown writes them once more.
//!
//! The stored `available_seats` column is never trusted on load. Hydration
//! rebuilds availability as `total_seats - held_seats - confirmed bookings`,
//! where `held_seats` records administrative corrections as they happen. A
//! restart between a booking and the next flush therefore loses nothing.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after a successful write, and only for
//! spaces whose seat count did not move during the write. A failed flush
//! keeps every flag for the next cycle.

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};
use wire::{Amenities, Space, SpaceType};

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("space {id} has unknown type {kind:?}")]
    UnknownType { id: i64, kind: String },
    #[error("space {0} violates seat bounds")]
    Inconsistent(i64),
}

// =============================================================================
// HYDRATION
// =============================================================================

#[derive(sqlx::FromRow)]
struct SpaceRow {
    id: i64,
    name: String,
    kind: String,
    total_seats: i32,
    held_seats: i32,
    confirmed_bookings: i64,
    address: String,
    latitude: f64,
    longitude: f64,
    wifi: bool,
    quiet_zone: bool,
    power: bool,
    group_space: bool,
    tags: Vec<String>,
    rating: Option<f32>,
    image_url: Option<String>,
}

impl TryFrom<SpaceRow> for Space {
    type Error = PersistenceError;

    fn try_from(row: SpaceRow) -> Result<Self, Self::Error> {
        let kind = SpaceType::parse(&row.kind).ok_or(PersistenceError::UnknownType { id: row.id, kind: row.kind })?;
        let available = i64::from(row.total_seats) - i64::from(row.held_seats) - row.confirmed_bookings;
        let available_seats = i32::try_from(available).map_err(|_| PersistenceError::Inconsistent(row.id))?;
        let space = Self {
            id: row.id,
            name: row.name,
            kind,
            total_seats: row.total_seats,
            available_seats,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
            amenities: Amenities {
                wifi: row.wifi,
                quiet_zone: row.quiet_zone,
                power: row.power,
                group_space: row.group_space,
            },
            tags: row.tags,
            rating: row.rating,
            image_url: row.image_url,
        };
        if !space.is_consistent() {
            return Err(PersistenceError::Inconsistent(space.id));
        }
        Ok(space)
    }
}

/// Load every space from Postgres, inserting `seed` first if the table is empty.
///
/// Availability is derived from held seats and confirmed bookings, not read back.
///
/// # Errors
///
/// Returns an error on database failure or a row that fails validation.
pub async fn hydrate_spaces(pool: &PgPool, seed: &[Space]) -> Result<Vec<Space>, PersistenceError> {
    let rows = sqlx::query_as::<_, SpaceRow>(
        "SELECT s.id, s.name, s.kind, s.total_seats, s.held_seats,
                (SELECT COUNT(*) FROM bookings b WHERE b.space_id = s.id AND b.status = 'confirmed')
                    AS confirmed_bookings,
                s.address, s.latitude, s.longitude, s.wifi, s.quiet_zone, s.power, s.group_space,
                s.tags, s.rating, s.image_url
         FROM spaces s ORDER BY s.id",
    )
    .fetch_all(pool)
    .await?;

    if !rows.is_empty() {
        let spaces = rows.into_iter().map(Space::try_from).collect::<Result<Vec<_>, _>>()?;
        write_seat_counts(pool, &spaces.iter().map(|s| (s.id, s.available_seats)).collect::<Vec<_>>()).await?;
        info!(count = spaces.len(), "spaces hydrated from database");
        return Ok(spaces);
    }

    let mut tx = pool.begin().await?;
    for space in seed {
        sqlx::query(
            "INSERT INTO spaces (id, name, kind, total_seats, available_seats, held_seats, address,
                                 latitude, longitude, wifi, quiet_zone, power, group_space, tags,
                                 rating, image_url)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(space.id)
        .bind(&space.name)
        .bind(space.kind.as_str())
        .bind(space.total_seats)
        .bind(space.available_seats)
        .bind(space.total_seats - space.available_seats)
        .bind(&space.address)
        .bind(space.latitude)
        .bind(space.longitude)
        .bind(space.amenities.wifi)
        .bind(space.amenities.quiet_zone)
        .bind(space.amenities.power)
        .bind(space.amenities.group_space)
        .bind(&space.tags)
        .bind(space.rating)
        .bind(&space.image_url)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    info!(count = seed.len(), "spaces table seeded");
    Ok(seed.to_vec())
}

// =============================================================================
// FLUSH
// =============================================================================

/// Spawn the background seat flush. Returns `None` when no database is configured.
pub fn spawn_persistence_task(state: AppState) -> Option<JoinHandle<()>> {
    let pool = state.pool.clone()?;
    let interval = state.config.seat_flush_interval;
    info!(flush_interval_ms = interval.as_millis(), "seat persistence flush configured");
    Some(tokio::spawn(async move {
        loop {
            flush_dirty_seats(&state, &pool).await;
            tokio::time::sleep(interval).await;
        }
    }))
}

/// Write every dirty seat count once. Returns the number of spaces written.
pub async fn flush_dirty_seats(state: &AppState, pool: &PgPool) -> usize {
    let dirty = state.registry.dirty_seats().await;
    if dirty.is_empty() {
        return 0;
    }

    match write_seat_counts(pool, &dirty).await {
        Ok(()) => {
            state.registry.clear_flushed(&dirty).await;
            dirty.len()
        }
        Err(e) => {
            error!(error = %e, count = dirty.len(), "seat flush failed");
            0
        }
    }
}

/// Final flush before exit. Returns the number of spaces written; 0 without a database.
pub async fn flush_on_shutdown(state: &AppState) -> usize {
    let Some(pool) = &state.pool else {
        return 0;
    };
    let written = flush_dirty_seats(state, pool).await;
    let pending = state.registry.dirty_seats().await.len();
    if pending > 0 {
        error!(pending, "seat counts not flushed at shutdown; rebuilt from bookings on next start");
    }
    written
}

/// Record an administrative seat correction. A positive `delta` frees seats.
///
/// # Errors
///
/// Returns an error if the update fails or the space row is missing.
pub async fn record_seat_adjustment(pool: &PgPool, space_id: i64, delta: i32) -> Result<(), PersistenceError> {
    let result = sqlx::query("UPDATE spaces SET held_seats = held_seats - $2, updated_at = now() WHERE id = $1")
        .bind(space_id)
        .bind(delta)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(PersistenceError::Database(sqlx::Error::RowNotFound));
    }
    Ok(())
}

async fn write_seat_counts(pool: &PgPool, seats: &[(i64, i32)]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (space_id, available) in seats {
        sqlx::query("UPDATE spaces SET available_seats = $2, updated_at = now() WHERE id = $1")
            .bind(space_id)
            .bind(available)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
