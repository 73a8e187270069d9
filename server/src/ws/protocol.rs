//! Wire protocol for the relay.
//!
//! Frames are JSON text in a `{ "event": <name>, "data": <payload> }`
//! envelope. Event names and payload shapes are fixed — deployed clients
//! depend on them: inbound `userRegister`, `updateChatUserList`,
//! `SendMessage`, `UserChatStatus`; outbound `NewMessage`, `GetUsersStatus`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::broker::presence::{PresenceSnapshot, StatusUpdate};
use crate::broker::Broker;
use crate::store::{MessageDraft, StoredMessage};
use crate::ws::ConnectionId;

/// Inbound events a client may emit.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Bind this connection to a logical user.
    #[serde(rename = "userRegister")]
    UserRegister(String),
    /// Full replace of the caller's interest list.
    #[serde(rename = "updateChatUserList")]
    UpdateChatUserList(InterestListUpdate),
    /// Persist and relay a chat message.
    #[serde(rename = "SendMessage")]
    SendMessage(MessageDraft),
    /// Typing/online status change.
    #[serde(rename = "UserChatStatus")]
    UserChatStatus(StatusUpdate),
}

#[derive(Debug, Deserialize)]
pub struct InterestListUpdate {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub list: Vec<String>,
}

/// Outbound events pushed to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "NewMessage")]
    NewMessage(NewMessagePayload),
    #[serde(rename = "GetUsersStatus")]
    GetUsersStatus(PresenceSnapshot),
}

/// `NewMessage` carries either the persisted record or the error shape —
/// the only user-visible error channel in the protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NewMessagePayload {
    Delivered(StoredMessage),
    Failed { error: String },
}

/// Handle one inbound text frame from `origin`: decode the envelope and
/// dispatch to the broker. Undecodable frames are logged and dropped —
/// the protocol is fire-and-forget, with no error channel beyond the
/// `NewMessage` failure shape.
pub async fn handle_frame(text: &str, origin: ConnectionId, broker: &Broker) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                connection = %origin,
                error = %e,
                "undecodable client frame dropped"
            );
            return;
        }
    };

    match event {
        ClientEvent::UserRegister(user_id) => {
            broker.register_user(&user_id, origin);
        }
        ClientEvent::UpdateChatUserList(update) => {
            broker.refresh_interest(&update.user_id, update.list);
        }
        ClientEvent::SendMessage(draft) => {
            if let Err(error) = broker.relay(draft).await {
                tracing::warn!(
                    connection = %origin,
                    error = %error,
                    "message relay failed"
                );
                let report = ServerEvent::NewMessage(NewMessagePayload::Failed {
                    error: "message not sent".to_string(),
                });
                if let Err(failure) = broker.push_to(origin, &report) {
                    tracing::debug!(
                        connection = %failure.connection,
                        "could not report relay failure to sender"
                    );
                }
            }
        }
        ClientEvent::UserChatStatus(update) => {
            broker.update_status(update);
        }
    }
}

/// Encode a server event as a JSON text WebSocket frame.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server event");
            None
        }
    }
}
