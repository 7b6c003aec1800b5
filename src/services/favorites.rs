//! Favorites — a per-user shortlist of spaces.
//!
//! DESIGN
//! ======
//! Favorites never touch seat counts. The store keeps `(user, space)` pairs;
//! the service checks the space exists when one is added and attaches the
//! live [`Space`] from the registry when favorites are listed, so a shortlist
//! always shows current availability.
//!
//! Adding is idempotent: a second add of the same pair returns the first
//! record. Removing a pair that is not stored is `NotFound`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::info;
use wire::{Favorite, Space};

use crate::services::booking::with_retry;
use crate::services::store::StoreError;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FavoriteError {
    #[error("space not found: {0}")]
    SpaceNotFound(i64),
    #[error("space {0} is not a favorite")]
    NotFound(i64),
    #[error("favorite store unavailable: {0}")]
    Unavailable(StoreError),
    #[error("favorite store failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for FavoriteError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() { Self::Unavailable(e) } else { Self::Store(e) }
    }
}

impl crate::error::ErrorCode for FavoriteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SpaceNotFound(_) => "E_SPACE_NOT_FOUND",
            Self::NotFound(_) => "E_FAVORITE_NOT_FOUND",
            Self::Unavailable(_) => "E_UNAVAILABLE",
            Self::Store(_) => "E_STORE_FAILED",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SpaceNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait FavoriteStore: Send + Sync {
    /// Store the pair. Returns the record and whether it was created by this call.
    async fn add(&self, user_id: &str, space_id: i64) -> Result<(Favorite, bool), StoreError>;

    /// Returns `false` if the pair was not stored.
    async fn remove(&self, user_id: &str, space_id: i64) -> Result<bool, StoreError>;

    /// Favorites of one user, newest first, without the nested space.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Favorite>, StoreError>;
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Add `space_id` to the shortlist of `user_id`. Returns the record and
/// whether it is new.
///
/// # Errors
///
/// - [`FavoriteError::SpaceNotFound`] for a space the registry does not hold
/// - [`FavoriteError::Unavailable`] / [`FavoriteError::Store`] on store failure
pub async fn add(state: &AppState, user_id: &str, space_id: i64) -> Result<(Favorite, bool), FavoriteError> {
    let space = state.registry.get(space_id).await.ok_or(FavoriteError::SpaceNotFound(space_id))?;
    let (mut favorite, created) =
        with_retry(state.config.store_retry, "add favorite", || state.favorites.add(user_id, space_id)).await?;
    if created {
        info!(favorite_id = favorite.id, space_id, user_id, "favorite added");
    }
    favorite.space = Some(space);
    Ok((favorite, created))
}

/// Remove `space_id` from the shortlist of `user_id`.
///
/// # Errors
///
/// - [`FavoriteError::NotFound`] if the pair was not stored
/// - [`FavoriteError::Unavailable`] / [`FavoriteError::Store`] on store failure
pub async fn remove(state: &AppState, user_id: &str, space_id: i64) -> Result<(), FavoriteError> {
    let removed =
        with_retry(state.config.store_retry, "remove favorite", || state.favorites.remove(user_id, space_id)).await?;
    if !removed {
        return Err(FavoriteError::NotFound(space_id));
    }
    info!(space_id, user_id, "favorite removed");
    Ok(())
}

/// Favorites of `user_id`, newest first, each with the space's current state.
///
/// # Errors
///
/// Returns [`FavoriteError::Unavailable`] / [`FavoriteError::Store`] on store failure.
pub async fn list_for_user(state: &AppState, user_id: &str) -> Result<Vec<Favorite>, FavoriteError> {
    let mut favorites =
        with_retry(state.config.store_retry, "list favorites", || state.favorites.list_for_user(user_id)).await?;
    let (spaces, _) = state.registry.get_all().await;
    let by_id: BTreeMap<i64, Space> = spaces.into_iter().map(|s| (s.id, s)).collect();
    for favorite in &mut favorites {
        favorite.space = by_id.get(&favorite.space_id).cloned();
    }
    Ok(favorites)
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    favorites: BTreeMap<i64, Favorite>,
    next_id: i64,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryFavoriteStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryFavoriteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Unavailable("favorite store lock poisoned".into()))
    }
}

#[async_trait]
impl FavoriteStore for MemoryFavoriteStore {
    async fn add(&self, user_id: &str, space_id: i64) -> Result<(Favorite, bool), StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner.favorites.values().find(|f| f.user_id == user_id && f.space_id == space_id) {
            return Ok((existing.clone(), false));
        }
        inner.next_id += 1;
        let favorite = Favorite {
            id: inner.next_id,
            user_id: user_id.to_owned(),
            space_id,
            created_at: OffsetDateTime::now_utc(),
            space: None,
        };
        inner.favorites.insert(favorite.id, favorite.clone());
        Ok((favorite, true))
    }

    async fn remove(&self, user_id: &str, space_id: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.favorites.values().find(|f| f.user_id == user_id && f.space_id == space_id).map(|f| f.id);
        Ok(id.is_some_and(|id| inner.favorites.remove(&id).is_some()))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Favorite>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.favorites.values().rev().filter(|f| f.user_id == user_id).cloned().collect())
    }
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

pub struct PgFavoriteStore {
    pool: PgPool,
}

impl PgFavoriteStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FavoriteRow {
    id: i64,
    user_id: String,
    space_id: i64,
    created_at: OffsetDateTime,
}

impl From<FavoriteRow> for Favorite {
    fn from(row: FavoriteRow) -> Self {
        Self { id: row.id, user_id: row.user_id, space_id: row.space_id, created_at: row.created_at, space: None }
    }
}

const FAVORITE_COLUMNS: &str = "id, user_id, space_id, created_at";

#[async_trait]
impl FavoriteStore for PgFavoriteStore {
    async fn add(&self, user_id: &str, space_id: i64) -> Result<(Favorite, bool), StoreError> {
        let inserted = sqlx::query_as::<_, FavoriteRow>(&format!(
            "INSERT INTO favorites (user_id, space_id) VALUES ($1, $2)
             ON CONFLICT (user_id, space_id) DO NOTHING
             RETURNING {FAVORITE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(space_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }
        let row = sqlx::query_as::<_, FavoriteRow>(&format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE user_id = $1 AND space_id = $2"
        ))
        .bind(user_id)
        .bind(space_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.into(), false))
    }

    async fn remove(&self, user_id: &str, space_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND space_id = $2")
            .bind(user_id)
            .bind(space_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Favorite>, StoreError> {
        let rows = sqlx::query_as::<_, FavoriteRow>(&format!(
            "SELECT {FAVORITE_COLUMNS} FROM favorites WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Favorite::from).collect())
    }
}

#[cfg(test)]
#[path = "favorites_test.rs"]
mod tests;
