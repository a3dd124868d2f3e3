pub mod actor;
pub mod broadcast;
pub mod connection;
pub mod gate;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use connection::{Connection, ConnectionId};
pub use registry::ConnectionRegistry;

/// Type alias for the sender half of a WebSocket connection's outbox.
/// The connection's writer task owns the receiving end and the socket sink,
/// so every write to one client goes through this queue in order.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
