use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::AppState;
use crate::ws;

/// Upgrade to the front-end WebSocket protocol
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state))
}
