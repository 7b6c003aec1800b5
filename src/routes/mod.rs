//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the REST endpoints and the `/ws` live channel under a
//! single Axum router. CORS is open because the browser UI is served from a
//! separate origin.

pub mod bookings;
pub mod favorites;
pub mod identity;
pub mod spaces;
pub mod ws;

use axum::extract::State;
use axum::{Json, Router};
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::handle_ws))
        .route("/api/spaces", get(spaces::list_spaces))
        .route("/api/spaces/{id}", get(spaces::get_space))
        .route("/api/admin/spaces/{id}/seats", post(spaces::adjust_seats))
        .route("/api/bookings", get(bookings::list_bookings).post(bookings::create_booking))
        .route("/api/bookings/{id}", delete(bookings::cancel_booking))
        .route("/api/favorites", get(favorites::list_favorites).post(favorites::add_favorite))
        .route("/api/favorites/{space_id}", delete(favorites::remove_favorite))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.registry.version().await,
        "connections": state.hub.connection_count().await,
        "tracked_connections": state.hub.tracked().await,
    }))
}
