//! Chat relay: stamp an inbound chat line and fan it out to everyone,
//! sender included.

use std::collections::HashSet;

use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::{now_timestamp, ServerMessage};
use crate::ws::registry::ConnectionRegistry;

/// Build the relayed record for a chat line from `username`.
pub fn stamp_chat(username: &str, message: String) -> ServerMessage {
    ServerMessage::Chat {
        username: username.to_string(),
        message,
        timestamp: now_timestamp(),
    }
}

/// Relay a chat line to every online connection, the sender's own
/// connection included so it sees the echo.
pub async fn relay_chat(registry: &ConnectionRegistry, username: &str, message: String) -> usize {
    let chat = stamp_chat(username, message);
    broadcast_to_all(registry, &chat, &HashSet::new()).await
}
