//! Integration tests for chat relay and presence fan-out.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::config::Config;
use relay_server::state::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Helper: start the relay on a random port.
async fn start_test_server() -> (SocketAddr, AppState) {
    let state = AppState::new(&Config {
        ping_interval_secs: 0,
        ..Config::default()
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = state.clone();
    tokio::spawn(async move {
        relay_server::server::serve(listener, server_state, std::future::pending())
            .await
            .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send");
}

async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Expected a message within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("Server sent invalid JSON")
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text message, got: {:?}", other),
        }
    }
}

async fn expect_silence(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "Expected no message, got: {:?}", result);
}

async fn join(addr: SocketAddr, username: &str) -> (Client, Value) {
    let mut ws = connect(addr).await;
    send_json(&mut ws, json!({"type": "init", "username": username})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "online_success", "Unexpected handshake reply: {reply}");
    (ws, reply)
}

#[tokio::test]
async fn test_two_user_conversation() {
    let (addr, _state) = start_test_server().await;

    // alice comes online alone
    let (mut alice, reply) = join(addr, "alice").await;
    assert_eq!(reply["number_of_online_users"], 1);
    let t0 = reply["timestamp"].as_i64().unwrap();

    // bob joins; alice hears about it, bob sees two online
    let (mut bob, reply) = join(addr, "bob").await;
    assert_eq!(reply["number_of_online_users"], 2);

    let joined = recv_json(&mut alice).await;
    assert_eq!(joined["type"], "user_online");
    assert_eq!(joined["username"], "bob");
    let t1 = joined["timestamp"].as_i64().unwrap();
    assert!(t1 >= t0);

    // alice chats; both receive the stamped echo
    send_json(
        &mut alice,
        json!({"type": "chat", "username": "alice", "message": "hi"}),
    )
    .await;

    for ws in [&mut alice, &mut bob] {
        let chat = recv_json(ws).await;
        assert_eq!(chat["type"], "chat");
        assert_eq!(chat["username"], "alice");
        assert_eq!(chat["message"], "hi");
        assert!(chat["timestamp"].as_i64().unwrap() >= t1);
    }

    // bob leaves; alice is told
    bob.send(Message::Close(None)).await.unwrap();
    let left = recv_json(&mut alice).await;
    assert_eq!(left["type"], "user_offline");
    assert_eq!(left["username"], "bob");
    assert!(left["timestamp"].as_i64().unwrap() >= t1);

    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn test_chat_is_relayed_under_registered_name() {
    let (addr, _state) = start_test_server().await;
    let (mut alice, _) = join(addr, "alice").await;

    send_json(
        &mut alice,
        json!({"type": "chat", "username": "mallory", "message": "not me", "timestamp": 1}),
    )
    .await;

    let chat = recv_json(&mut alice).await;
    assert_eq!(chat["username"], "alice");
    assert_eq!(chat["message"], "not me");
    assert_ne!(chat["timestamp"], 1);
}

#[tokio::test]
async fn test_every_connection_receives_broadcast_once() {
    let (addr, _state) = start_test_server().await;

    let mut clients = Vec::new();
    for i in 0..6 {
        let (ws, _) = join(addr, &format!("user{i}")).await;
        clients.push(ws);
    }
    // Drain the join notifications: user{i} saw every later arrival.
    for (i, ws) in clients.iter_mut().enumerate() {
        for _ in i + 1..6 {
            assert_eq!(recv_json(ws).await["type"], "user_online");
        }
    }

    send_json(&mut clients[0], json!({"type": "chat", "message": "all hands"})).await;

    for ws in clients.iter_mut() {
        let chat = recv_json(ws).await;
        assert_eq!(chat["type"], "chat");
        assert_eq!(chat["message"], "all hands");
        expect_silence(ws).await;
    }
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let (addr, _state) = start_test_server().await;
    let (mut alice, _) = join(addr, "alice").await;
    let (mut bob, _) = join(addr, "bob").await;
    assert_eq!(recv_json(&mut alice).await["type"], "user_online");

    for i in 0..25 {
        send_json(&mut alice, json!({"type": "chat", "message": format!("m{i}")})).await;
    }

    for ws in [&mut alice, &mut bob] {
        for i in 0..25 {
            let chat = recv_json(ws).await;
            assert_eq!(chat["message"], format!("m{i}"));
        }
    }
}

#[tokio::test]
async fn test_handshake_reply_always_arrives_first() {
    let (addr, _state) = start_test_server().await;

    // Keep a few connections chatting continuously while others join.
    let mut chatters = Vec::new();
    for i in 0..3 {
        let (mut ws, _) = join(addr, &format!("chatter{i}")).await;
        chatters.push(tokio::spawn(async move {
            for n in 0..40 {
                send_json(&mut ws, json!({"type": "chat", "message": format!("noise {n}")})).await;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            ws
        }));
    }

    let joiners: Vec<_> = (0..12)
        .map(|i| {
            tokio::spawn(async move {
                let mut ws = connect(addr).await;
                send_json(&mut ws, json!({"type": "init", "username": format!("joiner{i}")}))
                    .await;
                let first = recv_json(&mut ws).await;
                assert_eq!(
                    first["type"], "online_success",
                    "first record must be the handshake reply, got {first}"
                );
                ws
            })
        })
        .collect();

    for joiner in joiners {
        joiner.await.unwrap();
    }
    for chatter in chatters {
        chatter.await.unwrap();
    }
}

#[tokio::test]
async fn test_every_departure_is_announced_exactly_once() {
    let (addr, state) = start_test_server().await;
    let (mut watcher, _) = join(addr, "watcher").await;

    let mut leavers = Vec::new();
    for i in 0..5 {
        let (ws, _) = join(addr, &format!("leaver{i}")).await;
        assert_eq!(recv_json(&mut watcher).await["type"], "user_online");
        leavers.push(ws);
    }

    // Mix clean closes and dropped sockets.
    for (i, mut ws) in leavers.into_iter().enumerate() {
        if i % 2 == 0 {
            ws.send(Message::Close(None)).await.unwrap();
        } else {
            drop(ws);
        }
    }

    let mut gone = Vec::new();
    for _ in 0..5 {
        let event = recv_json(&mut watcher).await;
        assert_eq!(event["type"], "user_offline");
        gone.push(event["username"].as_str().unwrap().to_string());
    }
    gone.sort();
    let expected: Vec<String> = (0..5).map(|i| format!("leaver{i}")).collect();
    assert_eq!(gone, expected);

    expect_silence(&mut watcher).await;
    assert_eq!(state.registry.count(), 1);
}
