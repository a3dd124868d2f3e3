use axum::extract::ws::Message;
use futures_util::future::join_all;
use std::collections::HashSet;

use crate::ws::protocol::ServerMessage;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::ConnectionId;

/// Fan a frame out to every registered connection not in `excluded`.
///
/// Recipients come from one registry snapshot. Each delivery waits on the
/// recipient's readiness gate and then queues the frame on its outbox;
/// deliveries run concurrently and a closed recipient never holds up or
/// fails the others. Returns how many recipients accepted the frame.
pub async fn broadcast_frame(
    registry: &ConnectionRegistry,
    frame: Message,
    excluded: &HashSet<ConnectionId>,
) -> usize {
    let recipients = registry.snapshot_excluding(excluded);
    if recipients.is_empty() {
        return 0;
    }

    let deliveries = recipients.iter().map(|conn| {
        let frame = frame.clone();
        async move {
            match conn.deliver(frame).await {
                Ok(()) => true,
                Err(e) => {
                    // The recipient's own handler sees the closure and tears down.
                    tracing::debug!(conn_id = %conn.id(), error = %e, "Broadcast delivery dropped");
                    false
                }
            }
        }
    });

    join_all(deliveries)
        .await
        .into_iter()
        .filter(|delivered| *delivered)
        .count()
}

/// Encode a server record once and broadcast it.
pub async fn broadcast_to_all(
    registry: &ConnectionRegistry,
    message: &ServerMessage,
    excluded: &HashSet<ConnectionId>,
) -> usize {
    match message.to_frame() {
        Ok(frame) => broadcast_frame(registry, frame, excluded).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode broadcast message");
            0
        }
    }
}
