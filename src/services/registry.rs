//! Space registry — authoritative seat counts and the global state version.
//!
//! DESIGN
//! ======
//! One `RwLock` guards every space plus the version counter, so a seat
//! change and its version bump are a single atomic step. Successful changes
//! are published on an unbounded change stream while the write lock is still
//! held; consumers therefore observe changes in exact version order.
//!
//! Readers that need a snapshot consistent with "everything after version N
//! arrives on the stream" take [`Registry::read`] and keep the guard until
//! they have registered for changes.
//!
//! ERROR HANDLING
//! ==============
//! A rejected delta leaves the space, the version and the stream untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, mpsc};
use tracing::debug;
use wire::Space;

// =============================================================================
// TYPES
// =============================================================================

/// A committed registry mutation: the version it produced and the changed records.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryChange {
    pub version: u64,
    pub spaces: Vec<Space>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("space not found: {0}")]
    NotFound(i64),
    #[error("seat delta {delta} would leave space {space_id} outside 0..={total} (available {available})")]
    CapacityViolation { space_id: i64, delta: i32, available: i32, total: i32 },
    #[error("seat delta must be non-zero")]
    InvalidDelta,
}

impl crate::error::ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_SPACE_NOT_FOUND",
            Self::CapacityViolation { .. } => "E_CAPACITY_VIOLATION",
            Self::InvalidDelta => "E_INVALID_DELTA",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CapacityViolation { .. } => StatusCode::CONFLICT,
            Self::InvalidDelta => StatusCode::BAD_REQUEST,
        }
    }
}

struct RegistryInner {
    spaces: BTreeMap<i64, Space>,
    version: u64,
    /// Space IDs whose seat count changed since the last persistence flush.
    dirty: HashSet<i64>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Shared handle to the in-memory space catalog. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
    changes: mpsc::UnboundedSender<RegistryChange>,
}

/// Read guard over a consistent registry state.
pub struct RegistryReadGuard<'a> {
    guard: RwLockReadGuard<'a, RegistryInner>,
}

impl RegistryReadGuard<'_> {
    #[must_use]
    pub fn version(&self) -> u64 {
        self.guard.version
    }

    /// Every space, ordered by ID.
    #[must_use]
    pub fn spaces(&self) -> Vec<Space> {
        self.guard.spaces.values().cloned().collect()
    }
}

impl Registry {
    /// Build a registry at version 0 and return the receiving end of its change stream.
    ///
    /// Callers are expected to pass records that already satisfy the seat
    /// bounds; seed loading validates them.
    #[must_use]
    pub fn new(spaces: Vec<Space>) -> (Self, mpsc::UnboundedReceiver<RegistryChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let spaces = spaces.into_iter().map(|space| (space.id, space)).collect();
        let inner = RegistryInner { spaces, version: 0, dirty: HashSet::new() };
        (Self { inner: Arc::new(RwLock::new(inner)), changes: tx }, rx)
    }

    /// Acquire a consistent read view. Mutations wait until the guard drops.
    pub async fn read(&self) -> RegistryReadGuard<'_> {
        RegistryReadGuard { guard: self.inner.read().await }
    }

    /// Every space together with the version the set reflects.
    pub async fn get_all(&self) -> (Vec<Space>, u64) {
        let view = self.read().await;
        (view.spaces(), view.version())
    }

    pub async fn get(&self, space_id: i64) -> Option<Space> {
        self.inner.read().await.spaces.get(&space_id).cloned()
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// Atomically add `delta` to a space's available seats.
    ///
    /// On success the version increases by exactly one and the change is
    /// published before the lock is released.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidDelta`] for `delta == 0`
    /// - [`RegistryError::NotFound`] for an unknown space
    /// - [`RegistryError::CapacityViolation`] if the result leaves `0..=total_seats`
    pub async fn apply_seat_delta(&self, space_id: i64, delta: i32) -> Result<Space, RegistryError> {
        if delta == 0 {
            return Err(RegistryError::InvalidDelta);
        }

        let mut inner = self.inner.write().await;
        let space = inner.spaces.get_mut(&space_id).ok_or(RegistryError::NotFound(space_id))?;
        let Some(next) = space.seats_after(delta) else {
            return Err(RegistryError::CapacityViolation {
                space_id,
                delta,
                available: space.available_seats,
                total: space.total_seats,
            });
        };
        space.available_seats = next;
        let updated = space.clone();

        inner.version += 1;
        inner.dirty.insert(space_id);
        let version = inner.version;

        if self.changes.send(RegistryChange { version, spaces: vec![updated.clone()] }).is_err() {
            debug!(version, space_id, "registry: change stream has no consumer");
        }
        debug!(version, space_id, delta, available = next, "registry: seats changed");
        Ok(updated)
    }

    // =========================================================================
    // PERSISTENCE SUPPORT
    // =========================================================================

    /// Current seat counts of every dirty space.
    pub(crate) async fn dirty_seats(&self) -> Vec<(i64, i32)> {
        let inner = self.inner.read().await;
        let mut dirty = inner
            .dirty
            .iter()
            .filter_map(|id| inner.spaces.get(id).map(|space| (*id, space.available_seats)))
            .collect::<Vec<_>>();
        dirty.sort_unstable();
        dirty
    }

    /// Clear dirty flags for spaces whose seat count still equals the flushed value.
    pub(crate) async fn clear_flushed(&self, flushed: &[(i64, i32)]) {
        let mut inner = self.inner.write().await;
        for (space_id, seats) in flushed {
            let unchanged = inner.spaces.get(space_id).is_some_and(|space| space.available_seats == *seats);
            if unchanged {
                inner.dirty.remove(space_id);
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
