//! The real-time broker: one in-process aggregate owning all connection,
//! interest and presence routing state.
//!
//! Constructed once at startup and injected into the transport adapter via
//! `AppState` — never an ambient singleton, so it stays testable without a
//! live transport. All tables are guarded individually and fan-out iterates
//! snapshots of the target connection sets, so a disconnect racing a push
//! can at worst skip one dead connection.

pub mod interest;
pub mod presence;
pub mod registry;

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;

use crate::error::{DeliveryFailure, RelayError};
use crate::store::{MessageDraft, MessageStore, StoredMessage};
use crate::ws::protocol::{self, NewMessagePayload, ServerEvent};
use crate::ws::{ConnectionId, ConnectionSender};

use interest::InterestListStore;
use presence::{PresenceSnapshot, PresenceStore, StatusUpdate};
use registry::ConnectionRegistry;

pub struct Broker {
    registry: ConnectionRegistry,
    interests: InterestListStore,
    presence: PresenceStore,
    /// Transport-level socket table: the push side of every open connection.
    sockets: DashMap<ConnectionId, ConnectionSender>,
    store: Arc<dyn MessageStore>,
}

impl Broker {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry: ConnectionRegistry::default(),
            interests: InterestListStore::default(),
            presence: PresenceStore::default(),
            sockets: DashMap::new(),
            store,
        }
    }

    /// Transport hook: a physical connection opened.
    pub fn connect(&self, connection: ConnectionId, sender: ConnectionSender) {
        self.sockets.insert(connection, sender);
        tracing::debug!(connection = %connection, "transport connection attached");
    }

    /// Transport hook: a physical connection closed. Removes the socket and
    /// the registry route. Safe to call for an unknown or already-removed
    /// connection.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.sockets.remove(&connection);
        if let Some(user_id) = self.registry.unregister(connection) {
            tracing::debug!(
                connection = %connection,
                user_id = %user_id,
                "connection unregistered"
            );
        }
    }

    /// `userRegister`: bind a connection to the logical user it serves.
    pub fn register_user(&self, user_id: &str, connection: ConnectionId) {
        self.registry.register(user_id, connection);
        tracing::debug!(
            connection = %connection,
            user_id = %user_id,
            connections = self.registry.connections_for(user_id).len(),
            "user connection registered"
        );
    }

    /// `SendMessage`: persist via the Message Store, then fan the persisted
    /// record out to every connection of receiver and sender.
    ///
    /// The sender's own connections are included deliberately so all of the
    /// sender's other devices stay in sync. Delivery happens only after
    /// persistence succeeds; with concurrent relays, delivery order follows
    /// persistence completion order, not call order.
    pub async fn relay(&self, draft: MessageDraft) -> Result<StoredMessage, RelayError> {
        if !is_valid_user_id(&draft.sender) || !is_valid_user_id(&draft.receiver) {
            return Err(RelayError::InvalidParticipant);
        }
        let sender = draft.sender.clone();
        let receiver = draft.receiver.clone();

        let stored = self.store.create(draft).await?;

        // A connection id has at most one owner.
        let mut targets = self.registry.connections_for(&receiver);
        if sender != receiver {
            targets.extend(self.registry.connections_for(&sender));
        }

        tracing::debug!(
            message_id = %stored.id,
            sender = %sender,
            receiver = %receiver,
            targets = targets.len(),
            "relaying persisted message"
        );
        self.fan_out(
            &targets,
            &ServerEvent::NewMessage(NewMessagePayload::Delivered(stored.clone())),
        );
        Ok(stored)
    }

    /// `UserChatStatus`: record the sender's presence snapshot, then push it
    /// to the directed receiver's connections (if any) and to every
    /// connection of every user whose interest list contains the sender.
    pub fn update_status(&self, update: StatusUpdate) {
        let snapshot = self.presence.record(&update);

        let mut targets: Vec<ConnectionId> = Vec::new();
        if let Some(receiver) = update.receiver.as_deref() {
            targets.extend(self.registry.connections_for(receiver));
        }
        for watcher in self.interests.subscribers_of(&update.sender) {
            targets.extend(self.registry.connections_for(&watcher));
        }
        // The directed receiver may also watch the sender; each connection
        // gets one push.
        targets.sort_unstable();
        targets.dedup();

        tracing::debug!(
            user_id = %update.sender,
            targets = targets.len(),
            "fanning out status update"
        );
        self.fan_out(&targets, &ServerEvent::GetUsersStatus(snapshot));
    }

    /// `updateChatUserList`: replace the caller's interest list, then seed
    /// both sides with current state — each listed counterpart's last known
    /// status goes to the caller, and the caller's own last known status goes
    /// to each counterpart's connections. Without this a subscription change
    /// would show nothing until the next spontaneous status event.
    pub fn refresh_interest(&self, user_id: &str, list: Vec<String>) {
        self.interests.replace(user_id, list.clone());

        let own_connections = self.registry.connections_for(user_id);
        let own_status = self.presence.status_of(user_id);

        for counterpart in &list {
            if let Some(snapshot) = self.presence.status_of(counterpart) {
                self.fan_out(&own_connections, &ServerEvent::GetUsersStatus(snapshot));
            }
            if let Some(own) = &own_status {
                let counterpart_connections = self.registry.connections_for(counterpart);
                self.fan_out(
                    &counterpart_connections,
                    &ServerEvent::GetUsersStatus(own.clone()),
                );
            }
        }
    }

    /// Push one event to one connection. The outcome is the caller's to log;
    /// a failure here is expected during disconnect races.
    pub fn push_to(
        &self,
        connection: ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), DeliveryFailure> {
        let Some(message) = protocol::encode(event) else {
            return Err(DeliveryFailure { connection });
        };
        self.send_frame(connection, message)
    }

    /// Current snapshot for every tracked user.
    pub fn presence_overview(&self) -> Vec<PresenceSnapshot> {
        self.presence.all()
    }

    /// Close every live connection and drop the socket table. Registry
    /// routes left behind point at nothing and deliver nowhere.
    pub fn shutdown(&self) {
        for entry in self.sockets.iter() {
            let frame = CloseFrame {
                code: 1001,
                reason: "server shutting down".into(),
            };
            let _ = entry.value().send(Message::Close(Some(frame)));
        }
        self.sockets.clear();
        tracing::info!("broker shut down, all connections closed");
    }

    /// Deliver one already-encoded frame to a set of connections. Failed
    /// pushes are skipped, never aborting delivery to the remaining targets.
    fn fan_out(&self, targets: &[ConnectionId], event: &ServerEvent) {
        if targets.is_empty() {
            return;
        }
        let Some(message) = protocol::encode(event) else {
            return;
        };
        for &connection in targets {
            if let Err(failure) = self.send_frame(connection, message.clone()) {
                tracing::debug!(
                    connection = %failure.connection,
                    "push to dead connection skipped"
                );
            }
        }
    }

    fn send_frame(
        &self,
        connection: ConnectionId,
        message: Message,
    ) -> Result<(), DeliveryFailure> {
        match self.sockets.get(&connection) {
            Some(sender) if sender.send(message).is_ok() => Ok(()),
            _ => Err(DeliveryFailure { connection }),
        }
    }
}

/// Ids are opaque, but a participant id must be non-empty and free of
/// whitespace and control characters to be routable.
fn is_valid_user_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| !c.is_whitespace() && !c.is_control())
}
