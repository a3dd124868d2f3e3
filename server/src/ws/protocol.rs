//! JSON wire records exchanged over WebSocket text frames.
//!
//! Every record is an object tagged by `type`. Clients send `init` once and
//! then `chat`; everything else flows server to client.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Records a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake: the first record on a connection.
    Init { username: String },
    /// Relay payload. The client's `username` is informational only; the
    /// server relays under the name the connection registered with.
    Chat {
        #[serde(default)]
        username: Option<String>,
        message: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Init { .. } => "init",
            ClientMessage::Chat { .. } => "chat",
        }
    }
}

/// Records the server sends. Timestamps are server-assigned Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply, sent only to the connection that just came online.
    OnlineSuccess {
        number_of_online_users: usize,
        timestamp: i64,
    },
    Chat {
        username: String,
        message: String,
        timestamp: i64,
    },
    UserOnline {
        username: String,
        timestamp: i64,
    },
    UserOffline {
        username: String,
        timestamp: i64,
    },
    /// Handshake rejection under the unique-name policy.
    EmptyUsername,
    /// Handshake rejection under the unique-name policy.
    DuplicateUsername { username: String },
}

impl ServerMessage {
    /// Encode as a WebSocket text frame.
    pub fn to_frame(&self) -> Result<Message, RelayError> {
        let json = serde_json::to_string(self)?;
        Ok(Message::Text(json.into()))
    }
}

/// Decode one inbound text frame.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, RelayError> {
    Ok(serde_json::from_str(text)?)
}

/// Current server time in Unix seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
