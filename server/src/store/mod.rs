//! Message Store boundary.
//!
//! The relay never delivers a message it has not persisted, so every inbound
//! `SendMessage` goes through this collaborator first. The trait is the only
//! suspension point in the broker; everything else is synchronous in-memory
//! work.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteMessageStore;

/// Arbitrary message fields carried opaquely through the relay
/// (`message`, `messageType`, `files`, `appointmentId`, ...). The relay
/// routes on sender/receiver only and never inspects these.
pub type MessageFields = serde_json::Map<String, serde_json::Value>;

/// An inbound message before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub sender: String,
    pub receiver: String,
    #[serde(flatten)]
    pub fields: MessageFields,
}

/// A persisted, timestamped message record as fanned out to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: MessageFields,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("message payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// External persistence collaborator for chat messages.
///
/// `create` must either return a fully persisted record or an error; the
/// broker conditions all delivery on success. Timeout policy belongs to the
/// implementation, not to the broker.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, draft: MessageDraft) -> Result<StoredMessage, StoreError>;
}
