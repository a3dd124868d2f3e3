//! Join/leave notifications.
//!
//! A connection's arrival is announced to everyone else once its handshake
//! reply is queued; its departure is announced to everyone who remains.

use std::collections::HashSet;

use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::{now_timestamp, ServerMessage};
use crate::ws::registry::ConnectionRegistry;
use crate::ws::ConnectionId;

/// Presence transitions visible to other participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    /// Build the wire record announcing `username` in this status.
    pub fn event(&self, username: &str, timestamp: i64) -> ServerMessage {
        let username = username.to_string();
        match self {
            Self::Online => ServerMessage::UserOnline { username, timestamp },
            Self::Offline => ServerMessage::UserOffline { username, timestamp },
        }
    }
}

/// Tell every other connection that `username` came online.
pub async fn announce_online(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    username: &str,
    timestamp: i64,
) -> usize {
    let excluded: HashSet<ConnectionId> = [id].into_iter().collect();
    announce(registry, PresenceStatus::Online, username, timestamp, &excluded).await
}

/// Tell every remaining connection that `username` went offline.
pub async fn announce_offline(registry: &ConnectionRegistry, username: &str) -> usize {
    announce(
        registry,
        PresenceStatus::Offline,
        username,
        now_timestamp(),
        &HashSet::new(),
    )
    .await
}

async fn announce(
    registry: &ConnectionRegistry,
    status: PresenceStatus,
    username: &str,
    timestamp: i64,
    excluded: &HashSet<ConnectionId>,
) -> usize {
    let event = status.event(username, timestamp);
    let delivered = broadcast_to_all(registry, &event, excluded).await;
    tracing::debug!(
        username = %username,
        status = status.as_str(),
        delivered,
        "Presence announced"
    );
    delivered
}
