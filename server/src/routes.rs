use axum::{extract::State, Json, Router};

use crate::broker::presence::PresenceSnapshot;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint — the real-time transport boundary
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Read-only presence overview
    let presence_routes =
        Router::new().route("/api/presence", axum::routing::get(get_presence));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(presence_routes)
        .merge(health)
        .with_state(state)
}

/// GET /api/presence — last-known status snapshot for every tracked user.
async fn get_presence(State(state): State<AppState>) -> Json<Vec<PresenceSnapshot>> {
    Json(state.broker.presence_overview())
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
