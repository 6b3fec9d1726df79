use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat::{ConnectionSession, DirectMessage, Identity, JoinOutcome, SessionError};
use crate::state::AppState;
use crate::ws::ConnectionSender;

/// Frames sent by clients. JSON text with a `type` tag.
///
/// Legacy field names (`userId`, `recipientId`, `message`) are accepted.
/// A `sender` field, if present, is ignored: the sender is always the
/// session's bound identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    Join {
        #[serde(alias = "userId")]
        identity: Identity,
    },
    #[serde(alias = "sendMessage")]
    Message {
        #[serde(alias = "recipientId")]
        recipient: Identity,
        #[serde(alias = "message")]
        content: String,
    },
}

/// Frames pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    Joined { identity: Identity },
    Message(DirectMessage),
    DeliveryOutcome { success: bool },
    Error { code: String, message: String },
}

pub const ERROR_BAD_REQUEST: &str = "bad_request";
pub const ERROR_AUTH_FAILURE: &str = "auth_failure";
pub const ERROR_ALREADY_JOINED: &str = "already_joined";

/// Handle an incoming text frame: decode and dispatch.
pub async fn handle_text_message(text: &str, session: &mut ConnectionSession, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %session.authenticated(),
                session_id = %session.id(),
                error = %e,
                "Failed to decode client frame"
            );
            send_error(session.sender(), ERROR_BAD_REQUEST, "Invalid message frame");
            return;
        }
    };

    match event {
        ClientEvent::Join { identity } => handle_join(session, identity),
        ClientEvent::Message { recipient, content } => {
            // Result is already reported to the sender's sessions
            let _ = state.coordinator.send(session, recipient, content).await;
        }
    }
}

fn handle_join(session: &mut ConnectionSession, identity: Identity) {
    match session.join(identity.clone()) {
        Ok(outcome) => {
            if outcome == JoinOutcome::Bound {
                tracing::info!(
                    user_id = %identity,
                    session_id = %session.id(),
                    "Session joined"
                );
            }
            send_event(session.sender(), &ServerEvent::Joined { identity });
        }
        Err(err) => {
            tracing::warn!(
                user_id = %session.authenticated(),
                session_id = %session.id(),
                requested = %identity,
                error = %err,
                "Join rejected"
            );
            let code = match err {
                SessionError::IdentityMismatch => ERROR_AUTH_FAILURE,
                SessionError::AlreadyJoined(_) | SessionError::Closed => ERROR_ALREADY_JOINED,
            };
            send_error(session.sender(), code, &err.to_string());
        }
    }
}

/// Encode and queue an event as a text frame. Returns false if the
/// connection is gone; callers treat that as a dropped push.
pub fn send_event(tx: &ConnectionSender, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => tx.send(Message::Text(json.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            false
        }
    }
}

/// Send an error event.
pub fn send_error(tx: &ConnectionSender, code: &str, message: &str) {
    send_event(
        tx,
        &ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
}
