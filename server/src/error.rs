use crate::ws::ConnectionId;

/// Errors raised by the relay core.
///
/// None of these ever cross a connection boundary: the handler that hits
/// one tears its own connection down, and broadcast delivery failures are
/// swallowed per recipient.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("display name is empty")]
    EmptyName,

    #[error("display name already online: {0}")]
    DuplicateName(String),

    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RelayError {
    /// True for the handshake rejections a client can recover from by
    /// sending another `init`.
    pub fn is_name_rejection(&self) -> bool {
        matches!(self, RelayError::EmptyName | RelayError::DuplicateName(_))
    }
}
