use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
};
use std::net::SocketAddr;

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws
/// WebSocket upgrade endpoint. There is no authentication beyond the
/// display-name handshake that the actor runs after the upgrade; every
/// upgraded socket gets its own actor task.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(peer = %peer, "WebSocket upgrade requested");

    ws.max_message_size(state.limits.max_frame_bytes)
        .max_frame_size(state.limits.max_frame_bytes)
        .on_upgrade(move |socket| actor::run_connection(socket, state))
}
