//! WebSocket round trips against a live server on an ephemeral port

use chat_config::ChatConfig;
use chat_gateway::{ChatServer, ServerEvent};
use chat_grains::ChatCluster;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (SocketAddr, oneshot::Sender<()>, ChatCluster) {
    let mut config = ChatConfig::default();
    config.server.port = 0;
    let cluster = ChatCluster::new(&config).unwrap();
    let server = ChatServer::bind(&config, cluster.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));
    (addr, stop, cluster)
}

async fn connect(addr: SocketAddr, token: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/?access_token={}", addr, token))
        .await
        .unwrap();
    socket
}

async fn send(socket: &mut Socket, request: serde_json::Value) {
    socket
        .send(WsMessage::Text(request.to_string()))
        .await
        .unwrap();
}

async fn next_event(socket: &mut Socket) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn chat_round_trip_between_two_sessions() {
    let (addr, _stop, _cluster) = start_server().await;

    let mut alice = connect(addr, "alice-token").await;
    send(&mut alice, json!({"type": "set_username", "name": "alice"})).await;
    send(&mut alice, json!({"type": "join_channel", "channel": "general"})).await;
    send(&mut alice, json!({"type": "get_channels"})).await;
    assert_eq!(
        next_event(&mut alice).await,
        ServerEvent::Channels { channels: vec!["general".to_string()] }
    );

    let mut bob = connect(addr, "bob-token").await;
    send(&mut bob, json!({"type": "set_username", "name": "bob"})).await;
    send(&mut bob, json!({"type": "join_channel", "channel": "general"})).await;

    match next_event(&mut alice).await {
        ServerEvent::Message { channel, message } => {
            assert_eq!(channel, "general");
            assert_eq!(message.author(), "Server");
            assert_eq!(message.text(), "bob has joined the channel");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    send(
        &mut bob,
        json!({"type": "send_message", "channel": "general", "text": "hello"}),
    )
    .await;
    for socket in [&mut alice, &mut bob] {
        match next_event(socket).await {
            ServerEvent::Message { message, .. } => {
                assert_eq!(message.author(), "bob");
                assert_eq!(message.text(), "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    send(&mut alice, json!({"type": "get_channel_members", "channel": "general"})).await;
    assert_eq!(
        next_event(&mut alice).await,
        ServerEvent::Members {
            channel: "general".to_string(),
            members: vec!["alice".to_string(), "bob".to_string()],
        }
    );
}

#[tokio::test]
async fn disconnect_leaves_channels() {
    let (addr, _stop, cluster) = start_server().await;

    let mut alice = connect(addr, "alice-token").await;
    send(&mut alice, json!({"type": "set_username", "name": "alice"})).await;
    send(&mut alice, json!({"type": "join_channel", "channel": "general"})).await;
    send(&mut alice, json!({"type": "get_channels"})).await;
    assert_eq!(
        next_event(&mut alice).await,
        ServerEvent::Channels { channels: vec!["general".to_string()] }
    );

    alice.close(None).await.unwrap();

    let mut cleaned = false;
    for _ in 0..100 {
        if cluster.streams().subscription_count() == 0 {
            cleaned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleaned, "subscription survived disconnect");

    let mut observer = connect(addr, "observer-token").await;
    send(&mut observer, json!({"type": "get_channel_members", "channel": "general"})).await;
    assert_eq!(
        next_event(&mut observer).await,
        ServerEvent::Members {
            channel: "general".to_string(),
            members: vec![],
        }
    );
}

#[tokio::test]
async fn invalid_frames_are_reported() {
    let (addr, _stop, _cluster) = start_server().await;
    let mut socket = connect(addr, "alice-token").await;

    socket
        .send(WsMessage::Text("{\"type\":\"shout\"}".to_string()))
        .await
        .unwrap();
    match next_event(&mut socket).await {
        ServerEvent::Error { request, .. } => assert_eq!(request, None),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn connection_without_token_is_rejected() {
    let (addr, _stop, _cluster) = start_server().await;
    assert!(connect_async(format!("ws://{}/", addr)).await.is_err());
}
