use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. Authentication lives with the outer platform;
/// a connection declares its logical user after the upgrade via the
/// `userRegister` event.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connected(socket, state))
}

/// Hand the upgraded socket to the per-connection actor.
async fn handle_connected(socket: WebSocket, state: AppState) {
    actor::run_connection(socket, state).await;
}
