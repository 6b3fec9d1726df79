use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::WeakUnboundedSender;

use super::{Identity, SessionId};
use crate::ws::ConnectionSender;

type WeakSender = WeakUnboundedSender<axum::extract::ws::Message>;

/// Presence registry: identity -> live sessions joined under it.
///
/// A user can have several concurrent sessions (multiple devices/tabs).
/// The directory only holds weak handles to each session's outbound queue;
/// the connection actor owns the session. Entries are removed as soon as an
/// identity's last session deregisters.
#[derive(Default)]
pub struct IdentityDirectory {
    sessions: DashMap<Identity, HashMap<SessionId, WeakSender>>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session under `identity`. Registering the same session twice is a no-op.
    pub fn register(&self, identity: &Identity, session_id: SessionId, sender: &ConnectionSender) {
        let mut entry = self.sessions.entry(identity.clone()).or_default();
        entry
            .entry(session_id)
            .or_insert_with(|| sender.downgrade());
        let count = entry.len();
        drop(entry);

        tracing::debug!(
            user_id = %identity,
            session_id = %session_id,
            connections = count,
            "Session registered"
        );
    }

    /// Remove a session. Returns whether it was present.
    ///
    /// Runs under the shard lock for `identity`, so a concurrent lookup sees
    /// the set either before or after the removal, never half of it.
    pub fn deregister(&self, identity: &Identity, session_id: SessionId) -> bool {
        let removed = match self.sessions.entry(identity.clone()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&session_id).is_some();
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        };

        tracing::debug!(
            user_id = %identity,
            session_id = %session_id,
            removed,
            "Session deregistered"
        );
        removed
    }

    /// Session ids currently joined under `identity`. Empty when offline.
    pub fn live_sessions_for(&self, identity: &Identity) -> HashSet<SessionId> {
        self.sessions
            .get(identity)
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Outbound queues of the live sessions for `identity`.
    /// Sessions that are already torn down are skipped.
    pub fn senders_for(&self, identity: &Identity) -> Vec<(SessionId, ConnectionSender)> {
        self.sessions
            .get(identity)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|(id, weak)| weak.upgrade().map(|tx| (*id, tx)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Number of identities with at least one live session.
    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }
}
