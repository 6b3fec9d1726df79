use std::sync::Arc;
use thiserror::Error;

use super::{Identity, IdentityDirectory, SessionId};
use crate::ws::ConnectionSender;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is already joined as {0}")]
    AlreadyJoined(Identity),
    #[error("join identity does not match the authenticated user")]
    IdentityMismatch,
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Open, identity not bound yet
    Connected,
    Joined(Identity),
    /// Terminal
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Identity bound and registered in the directory
    Bound,
    /// Repeated join with the identity already bound
    Unchanged,
}

/// Runtime state of one live connection.
///
/// Owned by the connection actor. Closing (explicitly or by drop) always
/// removes the session from the directory, so a panicking or aborted actor
/// cannot leave a stale presence entry behind.
pub struct ConnectionSession {
    id: SessionId,
    /// Identity proven by the connection's token
    authenticated: Identity,
    state: SessionState,
    sender: ConnectionSender,
    directory: Arc<IdentityDirectory>,
}

impl ConnectionSession {
    pub fn open(
        authenticated: Identity,
        sender: ConnectionSender,
        directory: Arc<IdentityDirectory>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            authenticated,
            state: SessionState::Connected,
            sender,
            directory,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Bound identity, `None` until joined.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Joined(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn authenticated(&self) -> &Identity {
        &self.authenticated
    }

    /// Outbound queue for this connection.
    pub fn sender(&self) -> &ConnectionSender {
        &self.sender
    }

    /// Bind `identity` to this session. Only the authenticated identity may be
    /// joined; a second join with a different identity is rejected.
    pub fn join(&mut self, identity: Identity) -> Result<JoinOutcome, SessionError> {
        match &self.state {
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Joined(bound) if *bound == identity => Ok(JoinOutcome::Unchanged),
            SessionState::Joined(bound) => Err(SessionError::AlreadyJoined(bound.clone())),
            SessionState::Connected => {
                if identity != self.authenticated {
                    return Err(SessionError::IdentityMismatch);
                }
                self.directory.register(&identity, self.id, &self.sender);
                self.state = SessionState::Joined(identity);
                Ok(JoinOutcome::Bound)
            }
        }
    }

    /// Move to Closed, deregistering if joined. Idempotent.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined(identity) = previous {
            self.directory.deregister(&identity, self.id);
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
