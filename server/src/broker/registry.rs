//! Connection registry: which physical connections belong to which user.
//!
//! A user may have the app open on a phone and a browser tab at the same
//! time, so identity-to-connection is one-to-many. Disconnect events only
//! carry the connection id, so a reverse index (connection -> owner) is
//! maintained inside the same lock as the forward map — never derived by
//! scanning.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ws::ConnectionId;

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user id -> ordered set of live connections (insertion order).
    by_user: HashMap<String, Vec<ConnectionId>>,
    /// connection -> owning user, for O(1) unregister.
    owner: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    /// Add `connection` to `user_id`'s set. Idempotent, purely additive.
    /// A connection that re-registers under a different identity moves:
    /// a connection id appears under at most one user at a time.
    pub fn register(&self, user_id: &str, connection: ConnectionId) {
        let mut inner = self.inner.write().expect("registry lock");

        if let Some(previous) = inner.owner.insert(connection, user_id.to_string()) {
            if previous != user_id {
                if let Some(conns) = inner.by_user.get_mut(&previous) {
                    conns.retain(|c| *c != connection);
                }
            }
        }

        let conns = inner.by_user.entry(user_id.to_string()).or_default();
        if !conns.contains(&connection) {
            conns.push(connection);
        }
    }

    /// Remove `connection` from whichever user owns it, returning the owner.
    /// No-op (None) if the connection was never registered or already
    /// removed — disconnect events can arrive after logical cleanup.
    pub fn unregister(&self, connection: ConnectionId) -> Option<String> {
        let mut inner = self.inner.write().expect("registry lock");

        let owner = inner.owner.remove(&connection)?;
        let now_empty = match inner.by_user.get_mut(&owner) {
            Some(conns) => {
                conns.retain(|c| *c != connection);
                conns.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.by_user.remove(&owner);
        }
        Some(owner)
    }

    /// Snapshot of `user_id`'s live connections, in registration order.
    /// Empty if the user has none. Fan-out iterates the snapshot, so a
    /// concurrent disconnect can at worst produce a skipped push, never an
    /// error.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionId> {
        self.inner
            .read()
            .expect("registry lock")
            .by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}
