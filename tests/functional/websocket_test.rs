//! Functional tests for the WebSocket subscription endpoint

mod common;

use common::test_state;
use futures::{SinkExt, StreamExt};
use mesh_gateway::config::Settings;
use mesh_gateway::registry::RegisterRequest;
use mesh_gateway::{api, AppState};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

/// Next text frame as JSON, skipping control frames
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_subscribers(state: &AppState, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.hub.subscriber_count() != count {
        assert!(tokio::time::Instant::now() < deadline, "subscriber count never reached {}", count);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn seeded_state() -> Arc<AppState> {
    let state = test_state(Settings::default());
    state
        .registry
        .register(RegisterRequest::new("gen", "127.0.0.1", 9000).with_id("gen-1"))
        .unwrap();
    state
}

#[tokio::test]
async fn test_first_message_is_service_list() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;
    let message = next_json(&mut client).await;
    assert_eq!(message["type"], "service_list");
    assert_eq!(message["services"]["gen-1"]["name"], "gen");

    wait_for_subscribers(&state, 1).await;
    assert_eq!(state.metrics.active_subscribers(), 1);
}

#[tokio::test]
async fn test_ping_and_get_services() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;

    client
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = next_json(&mut client).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].is_string());

    client
        .send(Message::Text(r#"{"type":"get_services"}"#.to_string()))
        .await
        .unwrap();
    let list = next_json(&mut client).await;
    assert_eq!(list["type"], "service_list");
    assert!(list["services"]["gen-1"].is_object());
}

#[tokio::test]
async fn test_unknown_messages_keep_connection_open() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;

    client
        .send(Message::Text(r#"{"type":"subscribe"}"#.to_string()))
        .await
        .unwrap();
    client
        .send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    next_json(&mut first).await;
    next_json(&mut second).await;
    wait_for_subscribers(&state, 2).await;

    assert_eq!(state.hub.broadcast_update(), 2);
    for client in [&mut first, &mut second] {
        let update = next_json(client).await;
        assert_eq!(update["type"], "service_update");
        assert!(update["timestamp"].is_string());
        assert_eq!(update["services"]["gen-1"]["status"], "unknown");
    }
}

#[tokio::test]
async fn test_client_disconnect_unsubscribes() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    client.close(None).await.unwrap();
    wait_for_subscribers(&state, 0).await;
    assert_eq!(state.metrics.active_subscribers(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let state = seeded_state();
    let addr = serve(state.clone()).await;

    let mut client = connect(addr).await;
    next_json(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    state
        .shutdown(tokio::time::Instant::now() + Duration::from_secs(5))
        .await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection was not closed");

    // New upgrades are refused once the hub is closed
    assert!(connect_async(format!("ws://{}/ws", addr)).await.is_err());
}
