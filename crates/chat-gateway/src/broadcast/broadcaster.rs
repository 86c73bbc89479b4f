//! Cross-instance broadcaster
//!
//! Implements the `EventEmitter` port on top of the shared pub/sub bus.
//! Every emit is published as an envelope on `gateway:events`; each instance
//! delivers envelopes to its own matching sockets. The emitting instance
//! delivers locally right away and skips its own echo.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chat_cache::{PubSubBus, PubSubChannel, ReceivedMessage};
use chat_core::{EmitError, EmitTarget, EventEmitter, ServerEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;

/// Wire format of one cross-instance emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEnvelope {
    /// `serverId` of the emitting instance
    pub origin: String,
    pub target: EmitTarget,
    pub event: ServerEvent,
}

/// Emits to sockets wherever they live
pub struct ClusterBroadcaster {
    server_id: String,
    bus: Arc<dyn PubSubBus>,
    channel: PubSubChannel,
    connections: Arc<ConnectionManager>,
    running: AtomicBool,
}

impl ClusterBroadcaster {
    pub fn new(
        server_id: impl Into<String>,
        bus: Arc<dyn PubSubBus>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            bus,
            channel: PubSubChannel::gateway_events(),
            connections,
            running: AtomicBool::new(false),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Start relaying envelopes from other instances to local sockets
    ///
    /// The bus receiver is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Broadcaster is already running");
        }

        let receiver = self.bus.receiver();
        tracing::info!(server_id = %self.server_id, channel = %self.channel, "Broadcaster started");
        tokio::spawn(self.run(receiver, shutdown))
    }

    async fn run(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<ReceivedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = receiver.recv() => match msg {
                    Ok(msg) => {
                        self.handle_message(&msg);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "Broadcaster lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Broadcast bus closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Broadcaster loop ended");
    }

    /// Deliver one envelope received from the bus; returns local sockets reached
    pub fn handle_message(&self, msg: &ReceivedMessage) -> usize {
        if msg.channel != self.channel {
            return 0;
        }

        let envelope: BroadcastEnvelope = match serde_json::from_str(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed broadcast envelope, ignoring");
                return 0;
            }
        };

        if envelope.origin == self.server_id {
            return 0;
        }

        let sent = self.connections.deliver(&envelope.target, &envelope.event);
        tracing::trace!(
            origin = %envelope.origin,
            event = envelope.event.name(),
            sent,
            "Relayed remote emit"
        );
        sent
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventEmitter for ClusterBroadcaster {
    async fn emit(&self, target: EmitTarget, event: ServerEvent) -> Result<(), EmitError> {
        // Connection ids are unique cluster-wide, so a local hit needs no publish
        if let EmitTarget::Connection { connection_id } = &target {
            if self.connections.has_connection(connection_id) {
                self.connections.deliver(&target, &event);
                return Ok(());
            }
        }

        let envelope = BroadcastEnvelope {
            origin: self.server_id.clone(),
            target,
            event,
        };
        let payload = serde_json::to_string(&envelope)?;
        self.bus
            .publish(&self.channel, payload)
            .await
            .map_err(|e| EmitError::Transport(e.to_string()))?;

        self.connections.deliver(&envelope.target, &envelope.event);
        Ok(())
    }
}

impl std::fmt::Debug for ClusterBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterBroadcaster")
            .field("server_id", &self.server_id)
            .field("running", &self.is_running())
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundFrame;
    use chat_cache::InMemoryPubSub;
    use chat_core::events::TypingUpdate;
    use chat_core::{ConnectionId, UserId};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn typing() -> ServerEvent {
        ServerEvent::TypingUpdate(TypingUpdate {
            conversation_id: "1".into(),
            user_id: UserId::new("u1"),
            is_typing: true,
        })
    }

    fn instance(server_id: &str, bus: &InMemoryPubSub) -> Arc<ClusterBroadcaster> {
        Arc::new(ClusterBroadcaster::new(
            server_id,
            Arc::new(bus.clone()),
            ConnectionManager::new_shared(),
        ))
    }

    async fn recv(rx: &mut mpsc::Receiver<OutboundFrame>) -> Option<OutboundFrame> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_emit_reaches_socket_on_other_instance() {
        let bus = InMemoryPubSub::default();
        let (_tx, shutdown) = watch::channel(false);
        let s1 = instance("s1", &bus);
        let s2 = instance("s2", &bus);
        s1.clone().start(shutdown.clone());
        s2.clone().start(shutdown);

        let (tx, mut rx) = mpsc::channel(4);
        s2.connections
            .add_connection(ConnectionId::new("c3"), UserId::new("u2"), tx);

        s1.emit(EmitTarget::connection(ConnectionId::new("c3")), typing())
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await, Some(OutboundFrame::Event(typing())));
    }

    #[tokio::test]
    async fn test_own_echo_is_ignored() {
        let bus = InMemoryPubSub::default();
        let s1 = instance("s1", &bus);

        let (tx, mut rx) = mpsc::channel(4);
        s1.connections
            .add_connection(ConnectionId::new("c1"), UserId::new("u1"), tx);
        s1.connections.join_room(&ConnectionId::new("c1"), "conversation:1");

        let mut bus_rx = bus.receiver();
        s1.emit(EmitTarget::room("conversation:1"), typing()).await.unwrap();

        // Delivered once locally; the echo is dropped
        assert!(rx.try_recv().is_ok());
        let echo = bus_rx.recv().await.unwrap();
        assert_eq!(s1.handle_message(&echo), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_connection_skips_bus() {
        let bus = InMemoryPubSub::default();
        let s1 = instance("s1", &bus);
        let (tx, mut rx) = mpsc::channel(4);
        s1.connections
            .add_connection(ConnectionId::new("c1"), UserId::new("u1"), tx);

        let mut bus_rx = bus.receiver();
        s1.emit(EmitTarget::connection(ConnectionId::new("c1")), typing())
            .await
            .unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(bus_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_ignored() {
        let bus = InMemoryPubSub::default();
        let s1 = instance("s1", &bus);
        let msg = ReceivedMessage::new(PubSubChannel::gateway_events(), "not json");
        assert_eq!(s1.handle_message(&msg), 0);
    }
}
