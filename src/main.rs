mod config;
mod db;
mod error;
mod routes;
mod seed;
mod services;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::services::favorites::{FavoriteStore, MemoryFavoriteStore, PgFavoriteStore};
use crate::services::store::{BookingStore, MemoryBookingStore, PgBookingStore};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::AppConfig::from_env();
    let seed = seed::load_spaces(config.seed_file.as_deref()).expect("space catalog failed to load");

    let (pool, spaces, bookings, favorites) = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            let spaces = services::persistence::hydrate_spaces(&pool, &seed)
                .await
                .expect("space hydration failed");
            let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(pool.clone()));
            let favorites: Arc<dyn FavoriteStore> = Arc::new(PgFavoriteStore::new(pool.clone()));
            (Some(pool), spaces, store, favorites)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; bookings and favorites are kept in memory only");
            let store: Arc<dyn BookingStore> = Arc::new(MemoryBookingStore::new());
            let favorites: Arc<dyn FavoriteStore> = Arc::new(MemoryFavoriteStore::new());
            (None, seed, store, favorites)
        }
    };
    tracing::info!(count = spaces.len(), "space registry loaded");

    let (registry, changes) = services::registry::Registry::new(spaces);
    let port = config.port;
    let state = state::AppState::new(config, registry, bookings, favorites, pool);

    // Spawn the change fan-out and the seat persistence flush.
    let _fanout = services::hub::spawn_fanout_task(state.hub.clone(), changes);
    let _persistence = services::persistence::spawn_persistence_task(state.clone());

    let hub = state.hub.clone();
    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "calmcorners listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let closed = hub.close_all().await;
            tracing::info!(closed, "shutting down; live connections closed");
        })
        .await
        .expect("server failed");

    let flushed = services::persistence::flush_on_shutdown(&state).await;
    tracing::info!(flushed, "final seat flush complete");
}
