//! Broker-level tests: fan-out, registry cleanup, persistence gating,
//! interest reverse index, and relay ordering — all against stub message
//! stores, no live transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use telecare_server::broker::presence::StatusUpdate;
use telecare_server::broker::Broker;
use telecare_server::error::RelayError;
use telecare_server::store::{MessageDraft, MessageStore, StoreError, StoredMessage};
use telecare_server::ws::ConnectionId;

/// Store stub: persists nothing, returns sequential ids ("m1", "m2", ...)
/// and records every draft it was asked to create.
#[derive(Default)]
struct StubStore {
    counter: AtomicU32,
    created: Mutex<Vec<MessageDraft>>,
}

#[async_trait]
impl MessageStore for StubStore {
    async fn create(&self, draft: MessageDraft) -> Result<StoredMessage, StoreError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.created.lock().unwrap().push(draft.clone());
        Ok(StoredMessage {
            id: format!("m{n}"),
            sender: draft.sender,
            receiver: draft.receiver,
            created_at: Utc::now(),
            fields: draft.fields,
        })
    }
}

/// Store stub that always fails.
struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn create(&self, _draft: MessageDraft) -> Result<StoredMessage, StoreError> {
        Err(StoreError::Backend("store unreachable".to_string()))
    }
}

/// Store stub whose `create` calls block until the test releases them,
/// keyed by the draft's "text" field. Used to drive persistence completion
/// order independently of call order.
struct GatedStore {
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
}

impl GatedStore {
    fn new(gates: Vec<(&str, oneshot::Receiver<()>)>) -> Self {
        Self {
            gates: Mutex::new(
                gates
                    .into_iter()
                    .map(|(key, rx)| (key.to_string(), rx))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn create(&self, draft: MessageDraft) -> Result<StoredMessage, StoreError> {
        let key = draft.fields["text"].as_str().unwrap_or_default().to_string();
        let gate = self.gates.lock().unwrap().remove(&key);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(StoredMessage {
            id: format!("id-{key}"),
            sender: draft.sender,
            receiver: draft.receiver,
            created_at: Utc::now(),
            fields: draft.fields,
        })
    }
}

fn draft(sender: &str, receiver: &str, text: &str) -> MessageDraft {
    let mut fields = serde_json::Map::new();
    fields.insert("text".to_string(), serde_json::Value::String(text.to_string()));
    MessageDraft {
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        fields,
    }
}

/// Attach a fake connection for `user` and return its id plus the receiving
/// end where pushed frames land.
fn connect_user(broker: &Broker, user: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = ConnectionId::issue();
    broker.connect(connection, tx);
    broker.register_user(user, connection);
    (connection, rx)
}

/// Decode every frame currently queued on a fake connection.
fn drain_events(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            events.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    events
}

#[tokio::test]
async fn relay_reaches_every_device_exactly_once() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_c1, mut sock1) = connect_user(&broker, "u1");
    let (_c2, mut sock2) = connect_user(&broker, "u2");
    let (_c3, mut sock3) = connect_user(&broker, "u2");

    let stored = broker.relay(draft("u1", "u2", "hi")).await.unwrap();
    assert_eq!(stored.id, "m1");

    for sock in [&mut sock1, &mut sock2, &mut sock3] {
        let events = drain_events(sock);
        assert_eq!(events.len(), 1, "each device receives exactly one push");
        assert_eq!(events[0]["event"], "NewMessage");
        assert_eq!(events[0]["data"]["id"], "m1");
        assert_eq!(events[0]["data"]["sender"], "u1");
        assert_eq!(events[0]["data"]["receiver"], "u2");
        assert_eq!(events[0]["data"]["text"], "hi");
        assert!(events[0]["data"]["createdAt"].is_string());
    }
}

#[tokio::test]
async fn self_addressed_relay_pushes_each_connection_once() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_c1, mut sock1) = connect_user(&broker, "u1");
    let (_c2, mut sock2) = connect_user(&broker, "u1");

    broker.relay(draft("u1", "u1", "note to self")).await.unwrap();

    for sock in [&mut sock1, &mut sock2] {
        let events = drain_events(sock);
        assert_eq!(events.len(), 1, "sender-as-receiver is not pushed twice");
        assert_eq!(events[0]["data"]["sender"], "u1");
        assert_eq!(events[0]["data"]["receiver"], "u1");
        assert_eq!(events[0]["data"]["text"], "note to self");
    }
}

#[tokio::test]
async fn disconnect_removes_only_that_connection() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_s, mut sender_sock) = connect_user(&broker, "u1");
    let (c1, mut sock1) = connect_user(&broker, "u2");
    let (_c2, mut sock2) = connect_user(&broker, "u2");

    broker.disconnect(c1);

    broker.relay(draft("u1", "u2", "still there?")).await.unwrap();

    assert!(drain_events(&mut sock1).is_empty(), "disconnected device gets nothing");
    assert_eq!(drain_events(&mut sock2).len(), 1);
    assert_eq!(drain_events(&mut sender_sock).len(), 1);
}

#[tokio::test]
async fn failed_persistence_delivers_nothing() {
    let broker = Broker::new(Arc::new(FailingStore));
    let (_s, mut sender_sock) = connect_user(&broker, "u1");
    let (_r, mut receiver_sock) = connect_user(&broker, "u2");

    let result = broker.relay(draft("u1", "u2", "lost")).await;
    assert!(matches!(result, Err(RelayError::Persistence(_))));

    assert!(drain_events(&mut sender_sock).is_empty());
    assert!(drain_events(&mut receiver_sock).is_empty());
}

#[tokio::test]
async fn invalid_participant_is_rejected_before_persistence() {
    let store = Arc::new(StubStore::default());
    let broker = Broker::new(store.clone());
    let (_r, mut receiver_sock) = connect_user(&broker, "u2");

    let result = broker.relay(draft("", "u2", "no sender")).await;
    assert!(matches!(result, Err(RelayError::InvalidParticipant)));

    assert!(store.created.lock().unwrap().is_empty(), "store never consulted");
    assert!(drain_events(&mut receiver_sock).is_empty());
}

#[tokio::test]
async fn relay_is_not_idempotent() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_s, mut sender_sock) = connect_user(&broker, "u1");
    let (_r, mut receiver_sock) = connect_user(&broker, "u2");

    let first = broker.relay(draft("u1", "u2", "again")).await.unwrap();
    let second = broker.relay(draft("u1", "u2", "again")).await.unwrap();
    assert_ne!(first.id, second.id, "identical payloads persist as distinct records");

    assert_eq!(drain_events(&mut sender_sock).len(), 2);
    assert_eq!(drain_events(&mut receiver_sock).len(), 2);
}

#[tokio::test]
async fn status_update_targets_receiver_and_watchers_only() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_r, mut receiver_sock) = connect_user(&broker, "u2");
    let (_w, mut watcher_sock) = connect_user(&broker, "u3");
    let (_u, mut unrelated_sock) = connect_user(&broker, "u4");

    broker.refresh_interest("u3", vec!["u1".to_string()]);

    broker.update_status(StatusUpdate {
        sender: "u1".to_string(),
        receiver: Some("u2".to_string()),
        online: true,
        typing: true,
    });

    for sock in [&mut receiver_sock, &mut watcher_sock] {
        let events = drain_events(sock);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "GetUsersStatus");
        assert_eq!(events[0]["data"]["userId"], "u1");
        assert_eq!(events[0]["data"]["online"], true);
        assert_eq!(events[0]["data"]["typing"], true);
    }
    assert!(drain_events(&mut unrelated_sock).is_empty());
}

#[tokio::test]
async fn watchers_receive_undirected_status_via_reverse_index() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_a, mut a_sock) = connect_user(&broker, "a");
    let (_u, mut unrelated_sock) = connect_user(&broker, "u4");

    broker.refresh_interest("a", vec!["b".to_string()]);

    broker.update_status(StatusUpdate {
        sender: "b".to_string(),
        receiver: None,
        online: true,
        typing: false,
    });

    let events = drain_events(&mut a_sock);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["userId"], "b");
    assert_eq!(events[0]["data"]["online"], true);
    assert!(events[0]["data"]["lastActive"].is_string());
    assert!(drain_events(&mut unrelated_sock).is_empty());
}

#[tokio::test]
async fn receiver_who_also_watches_sender_gets_one_push() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_b, mut b_sock) = connect_user(&broker, "b");

    broker.refresh_interest("b", vec!["a".to_string()]);

    broker.update_status(StatusUpdate {
        sender: "a".to_string(),
        receiver: Some("b".to_string()),
        online: true,
        typing: false,
    });

    assert_eq!(drain_events(&mut b_sock).len(), 1, "duplicate target pushed once");
}

#[tokio::test]
async fn refresh_interest_seeds_both_sides() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_a, mut a_sock) = connect_user(&broker, "a");
    let (_b, mut b_sock) = connect_user(&broker, "b");

    // Both sides have a known status before the subscription change
    broker.update_status(StatusUpdate {
        sender: "a".to_string(),
        receiver: None,
        online: true,
        typing: false,
    });
    broker.update_status(StatusUpdate {
        sender: "b".to_string(),
        receiver: None,
        online: true,
        typing: true,
    });
    drain_events(&mut a_sock);
    drain_events(&mut b_sock);

    broker.refresh_interest("a", vec!["b".to_string()]);

    let a_events = drain_events(&mut a_sock);
    assert_eq!(a_events.len(), 1, "caller is seeded with counterpart's status");
    assert_eq!(a_events[0]["data"]["userId"], "b");
    assert_eq!(a_events[0]["data"]["typing"], true);

    let b_events = drain_events(&mut b_sock);
    assert_eq!(b_events.len(), 1, "counterpart is seeded with caller's status");
    assert_eq!(b_events[0]["data"]["userId"], "a");
}

#[tokio::test]
async fn refresh_interest_with_unknown_counterparts_seeds_nothing() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_a, mut a_sock) = connect_user(&broker, "a");

    // Neither side has ever reported status
    broker.refresh_interest("a", vec!["ghost".to_string()]);
    assert!(drain_events(&mut a_sock).is_empty());
}

#[tokio::test]
async fn delivery_order_follows_persistence_completion_order() {
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    let store = GatedStore::new(vec![("first", first_rx), ("second", second_rx)]);
    let broker = Arc::new(Broker::new(Arc::new(store)));

    let (_r, mut receiver_sock) = connect_user(&broker, "u2");

    let b1 = broker.clone();
    let relay_first = tokio::spawn(async move { b1.relay(draft("u1", "u2", "first")).await });
    let b2 = broker.clone();
    let relay_second = tokio::spawn(async move { b2.relay(draft("u1", "u2", "second")).await });

    // Let both relays reach their awaited store call, then complete the
    // second persistence before the first.
    tokio::task::yield_now().await;
    second_tx.send(()).unwrap();
    relay_second.await.unwrap().unwrap();
    first_tx.send(()).unwrap();
    relay_first.await.unwrap().unwrap();

    let events = drain_events(&mut receiver_sock);
    let texts: Vec<&str> = events
        .iter()
        .map(|e| e["data"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["second", "first"], "completion order wins, not call order");
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let broker = Broker::new(Arc::new(StubStore::default()));
    let (_c1, mut sock1) = connect_user(&broker, "u1");
    let (_c2, mut sock2) = connect_user(&broker, "u2");

    broker.shutdown();

    for sock in [&mut sock1, &mut sock2] {
        match sock.try_recv() {
            Ok(Message::Close(Some(frame))) => assert_eq!(frame.code, 1001),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    // Routing state is gone: a relay after shutdown reaches nobody
    broker.relay(draft("u1", "u2", "too late")).await.unwrap();
    assert!(drain_events(&mut sock1).is_empty());
    assert!(drain_events(&mut sock2).is_empty());
}
