use axum::extract::ws::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::ws::gate::ReadinessGate;
use crate::ws::ConnectionSender;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique handle for one accepted WebSocket.
///
/// Only [`ConnectionId::next`] mints values, so a handle removed from the
/// registry can never come back: a reconnect gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry-side record of an online connection.
///
/// The handler task owns the socket; this record only carries what the
/// broadcast engine needs to reach it: the display name, the readiness
/// gate, and a clone of the outbox feeding the connection's writer task.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    username: String,
    gate: Arc<ReadinessGate>,
    outbox: ConnectionSender,
    /// FIFO turn for broadcast deliveries parked on a closed gate.
    send_lock: Mutex<()>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        username: String,
        gate: Arc<ReadinessGate>,
        outbox: ConnectionSender,
    ) -> Self {
        Self {
            id,
            username,
            gate,
            outbox,
            send_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// Queue a frame without waiting on the gate. Only the handshake reply
    /// goes this way.
    pub fn send_direct(&self, frame: Message) -> Result<(), RelayError> {
        self.outbox
            .send(frame)
            .map_err(|_| RelayError::ConnectionClosed(self.id))
    }

    /// Queue a broadcast frame once the gate is open.
    ///
    /// Deliveries take the send lock before waiting, so frames parked on
    /// a closed gate are released in the order they were requested.
    pub async fn deliver(&self, frame: Message) -> Result<(), RelayError> {
        let _turn = self.send_lock.lock().await;
        self.gate.wait().await;
        self.outbox
            .send(frame)
            .map_err(|_| RelayError::ConnectionClosed(self.id))
    }
}
