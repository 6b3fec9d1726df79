use std::sync::Arc;
use thiserror::Error;

use super::store::{MessageStore, StoreError};
use super::{ConnectionSession, DirectMessage, Identity, IdentityDirectory, NewDirectMessage};
use crate::ws::protocol::{send_event, ServerEvent};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("session has not joined")]
    NotJoined,
    #[error("failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}

/// Send pipeline: persist, fan out to the recipient's live sessions, then
/// report the outcome to the sender's live sessions.
///
/// Nothing in here panics or propagates past `send`; every failure ends in a
/// `deliveryOutcome { success: false }` push.
pub struct DeliveryCoordinator {
    directory: Arc<IdentityDirectory>,
    store: Arc<dyn MessageStore>,
}

impl DeliveryCoordinator {
    pub fn new(directory: Arc<IdentityDirectory>, store: Arc<dyn MessageStore>) -> Self {
        Self { directory, store }
    }

    /// Deliver `content` from the origin session's bound identity to `recipient`.
    ///
    /// Callers serialize sends per session (the connection actor awaits each
    /// one before reading the next frame), which keeps a sender's messages
    /// persisted in order.
    pub async fn send(
        &self,
        origin: &ConnectionSession,
        recipient: Identity,
        content: String,
    ) -> Result<DirectMessage, DeliveryError> {
        let Some(sender) = origin.identity().cloned() else {
            tracing::debug!(
                session_id = %origin.id(),
                "Send attempted before join"
            );
            send_event(origin.sender(), &ServerEvent::DeliveryOutcome { success: false });
            return Err(DeliveryError::NotJoined);
        };

        let candidate = NewDirectMessage {
            sender: sender.clone(),
            recipient,
            content,
        };

        let store = self.store.clone();
        let persisted = tokio::task::spawn_blocking(move || store.append(candidate))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
            .and_then(|result| result);

        let message = match persisted {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    user_id = %sender,
                    session_id = %origin.id(),
                    error = %err,
                    "Failed to persist message"
                );
                self.report_outcome(&sender, false);
                return Err(DeliveryError::Persistence(err));
            }
        };

        let delivered = self.fan_out(&message);
        tracing::debug!(
            message_id = %message.id,
            user_id = %message.sender,
            recipient = %message.recipient,
            delivered,
            "Message delivered"
        );

        self.report_outcome(&sender, true);
        Ok(message)
    }

    /// Message history between two identities, oldest first.
    pub async fn history(
        &self,
        a: Identity,
        b: Identity,
    ) -> Result<Vec<DirectMessage>, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.query(&a, &b))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    /// Push the persisted message to every live session of its recipient.
    /// Returns how many pushes were accepted. Broken transports are skipped.
    fn fan_out(&self, message: &DirectMessage) -> usize {
        let event = ServerEvent::Message(message.clone());
        let mut delivered = 0;

        for (session_id, tx) in self.directory.senders_for(&message.recipient) {
            if send_event(&tx, &event) {
                delivered += 1;
            } else {
                tracing::debug!(
                    session_id = %session_id,
                    recipient = %message.recipient,
                    "Dropped push to closed session"
                );
            }
        }
        delivered
    }

    fn report_outcome(&self, sender: &Identity, success: bool) {
        let event = ServerEvent::DeliveryOutcome { success };
        for (_, tx) in self.directory.senders_for(sender) {
            send_event(&tx, &event);
        }
    }
}
