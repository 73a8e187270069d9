//! Interest list store: whose presence does each user want pushed to them.
//!
//! Purely declarative — the watch set is fully replaced on each update, not
//! merged. Status fan-out needs the inverse question ("who watches this
//! sender?") on every status change, so a reverse index (watched -> watchers)
//! is kept in the same lock as the forward map.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Default)]
pub struct InterestListStore {
    inner: RwLock<InterestInner>,
}

#[derive(Default)]
struct InterestInner {
    /// user id -> counterpart ids the user wants presence updates about.
    watching: HashMap<String, Vec<String>>,
    /// watched id -> users watching it.
    watchers: HashMap<String, HashSet<String>>,
}

impl InterestListStore {
    /// Full replace of `user_id`'s watch set. An empty list clears it.
    /// Counterpart existence is not validated; unknown ids simply never
    /// match a live connection.
    pub fn replace(&self, user_id: &str, list: Vec<String>) {
        let mut inner = self.inner.write().expect("interest lock");

        if let Some(old) = inner.watching.remove(user_id) {
            for watched in old {
                let now_empty = match inner.watchers.get_mut(&watched) {
                    Some(watchers) => {
                        watchers.remove(user_id);
                        watchers.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.watchers.remove(&watched);
                }
            }
        }

        for watched in &list {
            inner
                .watchers
                .entry(watched.clone())
                .or_default()
                .insert(user_id.to_string());
        }
        inner.watching.insert(user_id.to_string(), list);
    }

    /// Every user whose interest list currently contains `user_id`.
    pub fn subscribers_of(&self, user_id: &str) -> Vec<String> {
        self.inner
            .read()
            .expect("interest lock")
            .watchers
            .get(user_id)
            .map(|watchers| watchers.iter().cloned().collect())
            .unwrap_or_default()
    }
}
