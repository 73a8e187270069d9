//! Presence store: last reported activity snapshot per user.
//!
//! Last-write-wins, no history. There is deliberately no TTL or timer-based
//! expiry: an explicit status event is the only thing that changes presence.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// An inbound `UserChatStatus` event body.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    pub online: bool,
    #[serde(default)]
    pub typing: bool,
}

/// Last-known activity state for a user, as pushed in `GetUsersStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_id: String,
    /// The counterpart the user was interacting with when the status was
    /// emitted (e.g. who they are typing to), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
    pub online: bool,
    pub typing: bool,
    pub last_active: DateTime<Utc>,
}

#[derive(Default)]
pub struct PresenceStore {
    snapshots: DashMap<String, PresenceSnapshot>,
}

impl PresenceStore {
    /// Overwrite the stored snapshot for the update's sender, stamping
    /// `last_active = now`. Returns the snapshot that was stored.
    pub fn record(&self, update: &StatusUpdate) -> PresenceSnapshot {
        let snapshot = PresenceSnapshot {
            user_id: update.sender.clone(),
            counterpart: update.receiver.clone(),
            online: update.online,
            typing: update.typing,
            last_active: Utc::now(),
        };
        self.snapshots
            .insert(snapshot.user_id.clone(), snapshot.clone());
        snapshot
    }

    pub fn status_of(&self, user_id: &str) -> Option<PresenceSnapshot> {
        self.snapshots.get(user_id).map(|entry| entry.value().clone())
    }

    /// Current snapshot for every tracked user (REST overview endpoint).
    pub fn all(&self) -> Vec<PresenceSnapshot> {
        self.snapshots
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
