//! Shared helpers for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub state: parley_server::state::AppState,
}

/// Start the server on a random port over a fresh temp data dir.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(|_| {}).await
}

/// Like `start_test_server`, with a hook to adjust the state before serving.
pub async fn start_test_server_with(
    configure: impl FnOnce(&mut parley_server::state::AppState),
) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let mut state = parley_server::state::AppState::new(db, jwt_secret);
    configure(&mut state);
    let app = parley_server::routes::build_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        // Keep tmp_dir alive so the data directory isn't deleted
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
    }
}

/// Register a user and return (token, user_id).
pub async fn register_user(base_url: &str, email: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({ "email": email, "password": "correct horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Registration failed for {}", email);
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let profile: Value = client
        .get(format!("{}/api/auth/user", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let user_id = profile["id"].as_str().unwrap().to_string();

    (token, user_id)
}

pub async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next JSON event, or None if nothing arrives within `wait`.
pub async fn next_event_within(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Invalid JSON frame"));
            }
            // Keepalive frames are not events
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

pub async fn next_event(ws: &mut WsStream) -> Value {
    next_event_within(ws, Duration::from_secs(2))
        .await
        .expect("Expected an event within timeout")
}

/// Connect and join as `user_id`, consuming the join acknowledgement.
pub async fn connect_and_join(addr: SocketAddr, token: &str, user_id: &str) -> WsStream {
    let mut ws = connect(addr, token).await;
    send_json(&mut ws, json!({ "type": "join", "identity": user_id })).await;
    let ack = next_event(&mut ws).await;
    assert_eq!(ack["type"], "joined");
    assert_eq!(ack["identity"], user_id);
    ws
}
