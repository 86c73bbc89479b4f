//! Test fixtures and data generators
//!
//! Service wiring over the in-memory adapters plus builders for the broker
//! events the persistence pipeline would publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_cache::InMemoryStateStore;
use chat_core::{ChatEvent, ClientInfo, ConnectionId, ManualClock, UserId};
use chat_service::testing::RecordingEmitter;
use chat_service::{
    ConnectionLifecycle, ConnectionRegistry, DeliveryHandler, OfflineInbox, PresenceTracker,
};
use serde_json::{json, Value};

/// Counter for unique test data
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Get a unique suffix for test data
pub fn unique_suffix() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A user id nobody else in the test run uses
pub fn unique_user(prefix: &str) -> UserId {
    UserId::new(format!("{prefix}-{}", unique_suffix()))
}

pub const PRESENCE_TTL: Duration = Duration::from_secs(60);

/// Two gateway instances (`s1`, `s2`) sharing one state store, with a
/// recording emitter in place of the sockets
pub struct ClusterFixture {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStateStore>,
    pub s1: ConnectionLifecycle,
    pub s2: ConnectionLifecycle,
    pub inbox: OfflineInbox,
    pub emitter: Arc<RecordingEmitter>,
    pub delivery: DeliveryHandler,
}

impl ClusterFixture {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryStateStore::with_clock(clock.clone()));

        let lifecycle = |server_id: &str| {
            ConnectionLifecycle::new(
                ConnectionRegistry::new(store.clone(), clock.clone(), server_id),
                PresenceTracker::new(store.clone(), clock.clone(), PRESENCE_TTL, server_id),
            )
        };
        let s1 = lifecycle("s1");
        let s2 = lifecycle("s2");

        let inbox = OfflineInbox::new(store.clone());
        let emitter = Arc::new(RecordingEmitter::new());
        let delivery = DeliveryHandler::new(
            s1.registry().clone(),
            s1.presence().clone(),
            inbox.clone(),
            emitter.clone(),
        );

        Self {
            clock,
            store,
            s1,
            s2,
            inbox,
            emitter,
            delivery,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.s1.registry()
    }

    pub fn presence(&self) -> &PresenceTracker {
        self.s1.presence()
    }

    /// Connect `user` through `server` under connection id `conn`
    pub async fn connect(&self, server: &ConnectionLifecycle, user: &str, conn: &str) {
        server
            .connect(
                &UserId::new(user),
                &ConnectionId::new(conn),
                ClientInfo::new(Some("integration-test".to_string()), Some("127.0.0.1".to_string())),
            )
            .await
            .expect("connect");
    }

    pub async fn disconnect(&self, server: &ConnectionLifecycle, conn: &str) {
        server
            .disconnect(&ConnectionId::new(conn))
            .await
            .expect("disconnect");
    }
}

impl Default for ClusterFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// `message.sent` body as published on the chat exchange
pub fn message_sent_json(message_id: &str, sender: &str, participants: &[&str]) -> Value {
    json!({
        "eventType": "message.sent",
        "messageId": message_id,
        "conversationId": "conv-1",
        "senderId": sender,
        "participants": participants,
        "content": "hello there",
        "type": "text",
        "sentAt": "2024-05-01T12:00:00Z"
    })
}

pub fn message_sent(message_id: &str, sender: &str, participants: &[&str]) -> ChatEvent {
    serde_json::from_value(message_sent_json(message_id, sender, participants))
        .expect("valid message.sent")
}

/// `message.create-error` body for a rejected optimistic send
pub fn create_error_json(temp_message_id: &str, sender: &str) -> Value {
    json!({
        "eventType": "message.create-error",
        "tempMessageId": temp_message_id,
        "senderId": sender,
        "error": "Conversation not found"
    })
}

pub fn create_error(temp_message_id: &str, sender: &str) -> ChatEvent {
    serde_json::from_value(create_error_json(temp_message_id, sender))
        .expect("valid message.create-error")
}
