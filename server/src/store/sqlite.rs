//! SQLite-backed MessageStore.
//!
//! Inserts go through the shared `Arc<Mutex<Connection>>` inside
//! `tokio::task::spawn_blocking`, keeping the async runtime free while the
//! write completes. The record id and timestamp are assigned here so the
//! returned `StoredMessage` is exactly what was persisted.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::DbPool;
use crate::store::{MessageDraft, MessageStore, StoreError, StoredMessage};

pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, draft: MessageDraft) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            sender: draft.sender,
            receiver: draft.receiver,
            created_at: Utc::now(),
            fields: draft.fields,
        };

        let db = self.db.clone();
        let row = stored.clone();
        tokio::task::spawn_blocking(move || {
            let body = serde_json::to_string(&row.fields)?;
            let conn = db
                .lock()
                .map_err(|_| StoreError::Backend("database lock poisoned".to_string()))?;
            conn.execute(
                "INSERT INTO messages (id, sender, receiver, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    row.id,
                    row.sender,
                    row.receiver,
                    body,
                    row.created_at.to_rfc3339()
                ],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))??;

        Ok(stored)
    }
}
