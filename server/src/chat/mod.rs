//! Real-time direct-message delivery.
//!
//! `IdentityDirectory` tracks which live sessions belong to which identity,
//! `ConnectionSession` is the per-connection join/close state machine, and
//! `DeliveryCoordinator` runs the persist-then-fan-out pipeline on top of a
//! `MessageStore`.

pub mod delivery;
pub mod directory;
pub mod history;
pub mod session;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use delivery::{DeliveryCoordinator, DeliveryError};
pub use directory::IdentityDirectory;
pub use session::{ConnectionSession, JoinOutcome, SessionError, SessionState};
pub use store::{MessageStore, SqliteMessageStore, StoreError};

/// A registered user's account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A persisted direct message. Immutable once the store hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub sender: Identity,
    pub recipient: Identity,
    pub content: String,
    /// Unix millis, assigned on persist
    pub timestamp: i64,
}

/// A send intent that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewDirectMessage {
    pub sender: Identity,
    pub recipient: Identity,
    pub content: String,
}
