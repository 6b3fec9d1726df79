//! Integration tests for the WebSocket delivery flow: auth gating, join,
//! persist-then-fan-out, delivery outcomes, and presence cleanup.

mod common;

use common::{
    connect, connect_and_join, next_event, next_event_within, register_user, send_json,
    start_test_server, start_test_server_with,
};
use futures_util::{SinkExt, StreamExt};
use parley_server::chat::Identity;
use parley_server::ws::actor::Keepalive;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

const QUIET: Duration = Duration::from_millis(300);

async fn history(base_url: &str, token: &str, other_id: &str) -> Vec<Value> {
    let resp = reqwest::Client::new()
        .get(format!("{}/api/auth/messages/{}", base_url, other_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

/// Wait until the server has torn down every session of `user_id`.
async fn wait_offline(state: &parley_server::state::AppState, user_id: &str) {
    let identity = Identity::from(user_id);
    for _ in 0..50 {
        if !state.directory.is_online(&identity) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} still registered after disconnect", user_id);
}

#[tokio::test]
async fn test_invalid_token_is_closed_with_4002() {
    let server = start_test_server().await;

    let mut ws = connect(server.addr, "invalid_jwt_token").await;

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_token_is_closed_with_4002() {
    let server = start_test_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .expect("Upgrade should succeed without a token");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002)
            );
        }
        other => panic!("Expected close frame, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_message_to_online_recipient() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;
    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;

    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": bob_id, "content": "hi" }),
    )
    .await;

    let received = next_event(&mut bob).await;
    assert_eq!(received["type"], "message");
    assert_eq!(received["sender"], alice_id.as_str());
    assert_eq!(received["recipient"], bob_id.as_str());
    assert_eq!(received["content"], "hi");
    let timestamp = received["timestamp"].as_i64().unwrap();

    let outcome = next_event(&mut alice).await;
    assert_eq!(outcome, json!({ "type": "deliveryOutcome", "success": true }));

    let messages = history(&server.base_url, &alice_token, &bob_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["sender"], alice_id.as_str());
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[0]["timestamp"].as_i64().unwrap(), timestamp);

    // Same conversation from the other side
    let messages = history(&server.base_url, &bob_token, &alice_id).await;
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_message_to_offline_recipient_is_persisted() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;

    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": bob_id, "content": "see you later" }),
    )
    .await;

    let outcome = next_event(&mut alice).await;
    assert_eq!(outcome, json!({ "type": "deliveryOutcome", "success": true }));

    // Bob comes online afterwards: no replay over the socket, history has it
    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;
    assert!(next_event_within(&mut bob, QUIET).await.is_none());

    let messages = history(&server.base_url, &bob_token, &alice_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "see you later");
}

#[tokio::test]
async fn test_send_before_join_fails() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect(server.addr, &alice_token).await;
    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;

    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": bob_id, "content": "too early" }),
    )
    .await;

    let outcome = next_event(&mut alice).await;
    assert_eq!(outcome, json!({ "type": "deliveryOutcome", "success": false }));
    assert!(next_event_within(&mut bob, QUIET).await.is_none());
    assert!(history(&server.base_url, &alice_token, &bob_id).await.is_empty());

    // The connection stays usable
    send_json(&mut alice, json!({ "type": "join", "identity": alice_id })).await;
    assert_eq!(next_event(&mut alice).await["type"], "joined");
}

#[tokio::test]
async fn test_join_as_someone_else_is_rejected() {
    let server = start_test_server().await;
    let (alice_token, _alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (_bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect(server.addr, &alice_token).await;
    send_json(&mut alice, json!({ "type": "join", "identity": bob_id })).await;

    let error = next_event(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "auth_failure");
    assert!(!server.state.directory.is_online(&Identity::from(bob_id.as_str())));
}

#[tokio::test]
async fn test_sender_field_in_payload_is_ignored() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;
    let (_carol_token, carol_id) = register_user(&server.base_url, "carol@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;
    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;

    send_json(
        &mut alice,
        json!({
            "type": "message",
            "sender": carol_id,
            "recipient": bob_id,
            "content": "it's really alice"
        }),
    )
    .await;

    let received = next_event(&mut bob).await;
    assert_eq!(received["sender"], alice_id.as_str());
}

#[tokio::test]
async fn test_fan_out_to_every_recipient_session() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;
    let mut bob_phone = connect_and_join(server.addr, &bob_token, &bob_id).await;
    let mut bob_laptop = connect_and_join(server.addr, &bob_token, &bob_id).await;

    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": bob_id, "content": "both of you" }),
    )
    .await;

    for bob in [&mut bob_phone, &mut bob_laptop] {
        let received = next_event(bob).await;
        assert_eq!(received["content"], "both of you");
        // Exactly one copy per session
        assert!(next_event_within(bob, QUIET).await.is_none());
    }
}

#[tokio::test]
async fn test_outcome_reaches_all_sender_sessions() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (_bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice_phone = connect_and_join(server.addr, &alice_token, &alice_id).await;
    let mut alice_laptop = connect_and_join(server.addr, &alice_token, &alice_id).await;

    send_json(
        &mut alice_phone,
        json!({ "type": "message", "recipient": bob_id, "content": "hi" }),
    )
    .await;

    let expected = json!({ "type": "deliveryOutcome", "success": true });
    assert_eq!(next_event(&mut alice_phone).await, expected);
    assert_eq!(next_event(&mut alice_laptop).await, expected);
}

#[tokio::test]
async fn test_invalid_message_reports_failure() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;

    // Unknown recipient
    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": "no-such-user", "content": "hello?" }),
    )
    .await;
    assert_eq!(
        next_event(&mut alice).await,
        json!({ "type": "deliveryOutcome", "success": false })
    );

    // Malformed frame
    alice
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let error = next_event(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "bad_request");
}

#[tokio::test]
async fn test_disconnect_makes_recipient_offline() {
    let server = start_test_server().await;
    let (alice_token, alice_id) = register_user(&server.base_url, "alice@example.com").await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut alice = connect_and_join(server.addr, &alice_token, &alice_id).await;
    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;
    assert!(server.state.directory.is_online(&Identity::from(bob_id.as_str())));

    bob.send(Message::Close(None)).await.unwrap();
    drop(bob);
    wait_offline(&server.state, &bob_id).await;

    send_json(
        &mut alice,
        json!({ "type": "message", "recipient": bob_id, "content": "gone?" }),
    )
    .await;
    assert_eq!(
        next_event(&mut alice).await,
        json!({ "type": "deliveryOutcome", "success": true })
    );
    assert_eq!(history(&server.base_url, &alice_token, &bob_id).await.len(), 1);
}

#[tokio::test]
async fn test_abrupt_disconnect_is_cleaned_up() {
    let server = start_test_server().await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let bob = connect_and_join(server.addr, &bob_token, &bob_id).await;
    assert!(server.state.directory.is_online(&Identity::from(bob_id.as_str())));

    // Drop the TCP stream without a close handshake
    drop(bob);

    wait_offline(&server.state, &bob_id).await;
}

#[tokio::test]
async fn test_silent_peer_is_dropped_after_pong_timeout() {
    let server = start_test_server_with(|state| {
        state.keepalive = Keepalive {
            ping_interval: Duration::from_millis(100),
            pong_timeout: Duration::from_millis(100),
        };
    })
    .await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    // Never read again, so the server's pings go unanswered
    let _bob = connect_and_join(server.addr, &bob_token, &bob_id).await;
    assert!(server.state.directory.is_online(&Identity::from(bob_id.as_str())));

    wait_offline(&server.state, &bob_id).await;
}

#[tokio::test]
async fn test_responsive_peer_survives_keepalive() {
    let server = start_test_server_with(|state| {
        state.keepalive = Keepalive {
            ping_interval: Duration::from_millis(100),
            pong_timeout: Duration::from_millis(300),
        };
    })
    .await;
    let (bob_token, bob_id) = register_user(&server.base_url, "bob@example.com").await;

    let mut bob = connect_and_join(server.addr, &bob_token, &bob_id).await;

    // Reading lets the client answer pings; several rounds go by
    let _ = tokio::time::timeout(Duration::from_millis(700), async {
        while let Some(Ok(_)) = bob.next().await {}
    })
    .await;
    assert!(server.state.directory.is_online(&Identity::from(bob_id.as_str())));
}

#[tokio::test]
async fn test_client_ping_gets_pong() {
    let server = start_test_server().await;
    let (token, _user_id) = register_user(&server.base_url, "alice@example.com").await;

    let mut ws = connect(server.addr, &token).await;
    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}
