//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the space registry, the live connection hub, the booking and
//! favorite stores and, when configured, the database pool used for seat
//! persistence.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::services::favorites::FavoriteStore;
use crate::services::hub::Hub;
use crate::services::registry::Registry;
use crate::services::store::BookingStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Registry,
    pub hub: Hub,
    pub bookings: Arc<dyn BookingStore>,
    pub favorites: Arc<dyn FavoriteStore>,
    /// `None` when running without `DATABASE_URL`.
    pub pool: Option<PgPool>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        registry: Registry,
        bookings: Arc<dyn BookingStore>,
        favorites: Arc<dyn FavoriteStore>,
        pool: Option<PgPool>,
    ) -> Self {
        let hub = Hub::new(config.hub_queue_capacity);
        Self { config: Arc::new(config), registry, hub, bookings, favorites, pool }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
