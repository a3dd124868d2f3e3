use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::chat::messages::relay_chat;
use crate::chat::presence::{announce_offline, announce_online};
use crate::state::AppState;
use crate::ws::protocol::{decode_client_message, now_timestamp, ClientMessage, ServerMessage};
use crate::ws::registry::ConnectionRegistry;
use crate::ws::{ConnectionId, ConnectionSender};

/// Close code for a peer that stopped answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for protocol violations and handshake timeouts.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// How long the writer gets to flush a final close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame received or the stream ended.
    ClientClosed,
    TransportError(String),
    ProtocolViolation(String),
    HandshakeTimeout,
    KeepaliveTimeout,
    /// The writer task is gone, so nothing more can reach the client.
    OutboxClosed,
}

impl CloseReason {
    /// Close frame to send before hanging up, if the peer may still listen.
    fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            CloseReason::ProtocolViolation(_) => (CLOSE_POLICY_VIOLATION, "Protocol violation"),
            CloseReason::HandshakeTimeout => (CLOSE_POLICY_VIOLATION, "Handshake timeout"),
            CloseReason::KeepaliveTimeout => (CLOSE_GOING_AWAY, "Pong timeout"),
            _ => return None,
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

/// What an online connection needs for its teardown.
#[derive(Debug)]
struct Session {
    id: ConnectionId,
    username: String,
}

/// Connection state machine: `Accepted -> AwaitingHandshake -> Online -> Closed`.
enum Phase {
    Accepted,
    AwaitingHandshake,
    Online(Session),
    Closed {
        session: Option<Session>,
        reason: CloseReason,
    },
}

/// Drive one WebSocket from accept to teardown.
///
/// Splits the socket like every actor here: a writer task owns the sink
/// and drains the connection's outbox, and this task reads. Whatever ends
/// an online session, its `Closed` entry actions run exactly once.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let id = ConnectionId::next();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (outbox, rx) = mpsc::unbounded_channel::<Message>();
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut pong_rx = Some(pong_rx);
    let stale = Arc::new(Notify::new());
    let mut ping_handle: Option<JoinHandle<()>> = None;

    let mut phase = Phase::Accepted;
    loop {
        phase = match phase {
            Phase::Accepted => {
                tracing::debug!(conn_id = %id, "WebSocket accepted");
                Phase::AwaitingHandshake
            }
            Phase::AwaitingHandshake => {
                let handshake = timeout(
                    state.limits.handshake_timeout,
                    await_handshake(&mut ws_receiver, &outbox, &state.registry, id),
                )
                .await
                .unwrap_or(Err(CloseReason::HandshakeTimeout));

                match handshake {
                    Ok(session) => {
                        announce_online(&state.registry, id, &session.username, now_timestamp())
                            .await;
                        Phase::Online(session)
                    }
                    Err(reason) => Phase::Closed {
                        session: None,
                        reason,
                    },
                }
            }
            Phase::Online(session) => {
                if let (Some(every), Some(pong_rx)) = (state.limits.ping_interval, pong_rx.take()) {
                    ping_handle = Some(tokio::spawn(keepalive_task(
                        outbox.clone(),
                        pong_rx,
                        every,
                        state.limits.pong_timeout,
                        stale.clone(),
                    )));
                }

                let reason =
                    relay_loop(&mut ws_receiver, &outbox, &state, &session, &pong_tx, &stale)
                        .await;
                Phase::Closed {
                    session: Some(session),
                    reason,
                }
            }
            Phase::Closed { session, reason } => {
                match session {
                    Some(session) => {
                        close_connection(&state.registry, session.id).await;
                        match &reason {
                            CloseReason::ClientClosed => tracing::info!(
                                conn_id = %id,
                                username = %session.username,
                                "User is disconnected"
                            ),
                            CloseReason::ProtocolViolation(detail) => tracing::warn!(
                                conn_id = %id,
                                username = %session.username,
                                detail = %detail,
                                "Protocol violation, closing connection"
                            ),
                            other => tracing::info!(
                                conn_id = %id,
                                username = %session.username,
                                reason = ?other,
                                "User lost connection"
                            ),
                        }
                    }
                    None => {
                        tracing::debug!(conn_id = %id, reason = ?reason, "Handshake failed, connection discarded");
                    }
                }

                if let Some(frame) = reason.close_frame() {
                    let _ = outbox.send(Message::Close(Some(frame)));
                }
                break;
            }
        };
    }

    if let Some(handle) = ping_handle {
        handle.abort();
    }
    drop(outbox);

    // The writer exits once every outbox clone is gone; give it a moment to
    // flush a close frame, then stop it regardless.
    if timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }
}

/// `Closed` entry actions: remove the connection and announce the departure.
///
/// Safe to call more than once for the same handle; only the call that
/// actually removed the connection broadcasts `user_offline`. Opening the
/// gate releases any broadcast still parked on a connection that never
/// finished coming online. Returns whether this call did the teardown.
pub async fn close_connection(registry: &ConnectionRegistry, id: ConnectionId) -> bool {
    let Some(connection) = registry.unregister(id) else {
        return false;
    };
    connection.gate().open();
    announce_offline(registry, connection.username()).await;
    true
}

/// Read until a valid `init` registers the connection.
///
/// On success the handshake reply has been queued straight onto the
/// outbox and the gate is open, with no suspension point between
/// registration and the gate opening. Rejected names (unique policy) are
/// answered and the client may try again; anything else ends the
/// connection before it ever becomes visible.
async fn await_handshake(
    receiver: &mut SplitStream<WebSocket>,
    outbox: &ConnectionSender,
    registry: &ConnectionRegistry,
    id: ConnectionId,
) -> Result<Session, CloseReason> {
    loop {
        let text = match receiver.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = outbox.send(Message::Pong(data));
                continue;
            }
            Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                return Err(CloseReason::ProtocolViolation("binary frame".to_string()))
            }
            Some(Ok(Message::Close(_))) | None => return Err(CloseReason::ClientClosed),
            Some(Err(e)) => return Err(CloseReason::TransportError(e.to_string())),
        };

        let username = match decode_client_message(text.as_str()) {
            Ok(ClientMessage::Init { username }) => username,
            Ok(other) => {
                return Err(CloseReason::ProtocolViolation(format!(
                    "expected init, got {}",
                    other.kind()
                )))
            }
            Err(e) => return Err(CloseReason::ProtocolViolation(e.to_string())),
        };

        let registration = match registry.register(id, &username, outbox.clone()) {
            Ok(registration) => registration,
            Err(e) if e.is_name_rejection() => {
                tracing::debug!(
                    conn_id = %id,
                    username = %username,
                    policy = ?registry.policy(),
                    error = %e,
                    "Handshake rejected"
                );
                let rejection = if username.trim().is_empty() {
                    ServerMessage::EmptyUsername
                } else {
                    ServerMessage::DuplicateUsername { username }
                };
                send_direct(outbox, &rejection)?;
                continue;
            }
            Err(e) => return Err(CloseReason::ProtocolViolation(e.to_string())),
        };

        let reply = ServerMessage::OnlineSuccess {
            number_of_online_users: registration.online,
            timestamp: now_timestamp(),
        };
        let sent = send_direct(outbox, &reply);
        registration.gate.open();

        tracing::info!(conn_id = %id, username = %username, online = registration.online, "User is connected");
        if let Err(reason) = sent {
            // Registered but unreachable: the reader will see the dead
            // socket next and leave through `Closed`.
            tracing::debug!(conn_id = %id, reason = ?reason, "Handshake reply not queued");
        }
        return Ok(Session { id, username });
    }
}

/// Steady state: relay chat lines until the connection ends.
async fn relay_loop(
    receiver: &mut SplitStream<WebSocket>,
    outbox: &ConnectionSender,
    state: &AppState,
    session: &Session,
    pong_tx: &mpsc::UnboundedSender<()>,
    stale: &Notify,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = stale.notified() => return CloseReason::KeepaliveTimeout,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match decode_client_message(text.as_str()) {
                Ok(ClientMessage::Chat { message, .. }) => {
                    relay_chat(&state.registry, &session.username, message).await;
                }
                Ok(other) => {
                    return CloseReason::ProtocolViolation(format!(
                        "unexpected {} while online",
                        other.kind()
                    ))
                }
                Err(e) => return CloseReason::ProtocolViolation(e.to_string()),
            },
            Some(Ok(Message::Binary(_))) => {
                return CloseReason::ProtocolViolation("binary frame".to_string())
            }
            Some(Ok(Message::Ping(data))) => {
                if outbox.send(Message::Pong(data)).is_err() {
                    return CloseReason::OutboxClosed;
                }
            }
            Some(Ok(Message::Pong(_))) => {
                let _ = pong_tx.send(());
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(conn_id = %session.id, reason = ?frame, "Client initiated close");
                return CloseReason::ClientClosed;
            }
            Some(Err(e)) => return CloseReason::TransportError(e.to_string()),
            None => return CloseReason::ClientClosed,
        }
    }
}

fn send_direct(outbox: &ConnectionSender, message: &ServerMessage) -> Result<(), CloseReason> {
    let frame = message
        .to_frame()
        .map_err(|e| CloseReason::ProtocolViolation(e.to_string()))?;
    outbox.send(frame).map_err(|_| CloseReason::OutboxClosed)
}

/// Ping the client periodically; flag the connection stale when a pong
/// does not come back in time.
async fn keepalive_task(
    outbox: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    every: Duration,
    pong_timeout: Duration,
    stale: Arc<Notify>,
) {
    let mut ping_timer = interval(every);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Only a pong that answers this ping counts.
        while pong_rx.try_recv().is_ok() {}

        if outbox.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                stale.notify_one();
                break;
            }
        }
    }
}

/// Writer task: receives messages from the outbox and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
