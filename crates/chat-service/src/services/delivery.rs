//! Message delivery
//!
//! Consumes message lifecycle events from the chat exchange and fans them
//! out to live sockets. Recipients are resolved only through the presence
//! tracker and connection registry, so this handler can run on any instance.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::events::{
    MessageConfirmed, MessageConfirmedEvent, MessageCreateErrorEvent, MessageError, MessageNew,
    MessageSentEvent,
};
use chat_core::{ChatEvent, ConnectionId, EmitTarget, EventEmitter, ServerEvent, UserId};
use chat_queue::{MessageContext, MessageHandler, ProcessError};
use tracing::{debug, instrument, warn};

use super::error::ServiceResult;
use super::inbox::OfflineInbox;
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;

/// What one event turned into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the event was emitted to
    pub delivered: Vec<ConnectionId>,
    /// Recipients whose message id went to the offline inbox
    pub deferred: Vec<UserId>,
    /// The event was acknowledged without any emit
    pub dropped: bool,
}

impl DeliveryReport {
    fn dropped() -> Self {
        Self {
            dropped: true,
            ..Self::default()
        }
    }
}

/// Handler for `message-delivery-queue`
#[derive(Clone)]
pub struct DeliveryHandler {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
    inbox: OfflineInbox,
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for DeliveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandler")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DeliveryHandler {
    pub fn new(
        registry: ConnectionRegistry,
        presence: PresenceTracker,
        inbox: OfflineInbox,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            registry,
            presence,
            inbox,
            emitter,
        }
    }

    /// Route one decoded event
    pub async fn handle(&self, event: ChatEvent) -> ServiceResult<DeliveryReport> {
        match event {
            ChatEvent::MessageSent(event) => self.deliver_message(&event).await,
            ChatEvent::MessageConfirmed(event) => self.confirm_message(&event).await,
            ChatEvent::MessageCreateError(event) => self.report_create_error(&event).await,
            other => {
                warn!(event_type = other.event_type(), "Unhandled event type, acknowledging");
                Ok(DeliveryReport::dropped())
            }
        }
    }

    /// Fan a persisted message out to every participant except the sender
    #[instrument(skip(self, event), fields(message_id = %event.message_id))]
    pub async fn deliver_message(&self, event: &MessageSentEvent) -> ServiceResult<DeliveryReport> {
        if let Some(field) = event.missing_field() {
            warn!(field, "Invalid message.sent event, skipping");
            return Ok(DeliveryReport::dropped());
        }

        let payload = ServerEvent::MessageNew(MessageNew {
            message_id: event.message_id.clone(),
            conversation_id: event.conversation_id.clone(),
            sender_id: event.sender_id.clone(),
            content: event.content.clone(),
            message_type: event.message_type.clone(),
            metadata: event
                .metadata
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            sent_at: event.sent_at,
            temp_message_id: event.temp_message_id.clone(),
        });

        // Live emits first; offline recipients are queued once every emit went out
        let mut report = DeliveryReport::default();
        for recipient in event.recipients() {
            let connections = if self.presence.is_online(&recipient).await? {
                self.registry.get_connections(&recipient).await?
            } else {
                Vec::new()
            };

            if connections.is_empty() {
                report.deferred.push(recipient);
                continue;
            }

            for connection_id in connections {
                self.emitter
                    .emit(EmitTarget::connection(connection_id.clone()), payload.clone())
                    .await?;
                report.delivered.push(connection_id);
            }
            debug!(user_id = %recipient, "Message delivered");
        }

        for recipient in &report.deferred {
            if self.inbox.append(recipient, &event.message_id).await? {
                debug!(user_id = %recipient, "Recipient offline, queued for catch-up");
            } else {
                debug!(user_id = %recipient, "Recipient offline, already queued");
            }
        }

        Ok(report)
    }

    /// Tell the sender's sockets the provisional id is now persisted
    #[instrument(skip(self, event), fields(message_id = %event.message_id))]
    pub async fn confirm_message(&self, event: &MessageConfirmedEvent) -> ServiceResult<DeliveryReport> {
        if let Some(field) = event.missing_field() {
            warn!(field, "Invalid message.confirmed event, skipping");
            return Ok(DeliveryReport::dropped());
        }

        let payload = ServerEvent::MessageConfirmed(MessageConfirmed {
            temp_message_id: event.temp_message_id.clone(),
            real_message_id: event.message_id.clone(),
            conversation_id: event.conversation_id.clone(),
            sent_at: event.sent_at,
        });
        self.emit_to_sender(&event.sender_id, payload).await
    }

    /// Tell the sender's sockets a send failed; dropped when none are open
    #[instrument(skip(self, event), fields(temp_message_id = %event.temp_message_id))]
    pub async fn report_create_error(&self, event: &MessageCreateErrorEvent) -> ServiceResult<DeliveryReport> {
        if let Some(field) = event.missing_field() {
            warn!(field, "Invalid message.create-error event, skipping");
            return Ok(DeliveryReport::dropped());
        }

        let payload = ServerEvent::MessageError(MessageError {
            temp_message_id: event.temp_message_id.clone(),
            error: event
                .error
                .clone()
                .unwrap_or_else(|| MessageError::DEFAULT_ERROR.to_string()),
            conversation_id: event.conversation_id.clone(),
        });
        self.emit_to_sender(&event.sender_id, payload).await
    }

    async fn emit_to_sender(&self, sender_id: &UserId, payload: ServerEvent) -> ServiceResult<DeliveryReport> {
        let connections = self.registry.get_connections(sender_id).await?;
        if connections.is_empty() {
            warn!(
                user_id = %sender_id,
                event = payload.name(),
                "Sender has no active connections, dropping notification"
            );
            return Ok(DeliveryReport::dropped());
        }

        let mut report = DeliveryReport::default();
        for connection_id in connections {
            self.emitter
                .emit(EmitTarget::connection(connection_id.clone()), payload.clone())
                .await?;
            report.delivered.push(connection_id);
        }
        debug!(user_id = %sender_id, event = payload.name(), "Sender notified");
        Ok(report)
    }
}

#[async_trait]
impl MessageHandler for DeliveryHandler {
    type Event = ChatEvent;

    fn name(&self) -> &'static str {
        "message-delivery"
    }

    async fn process(&self, event: ChatEvent, _ctx: &MessageContext) -> Result<(), ProcessError> {
        self.handle(event).await?;
        Ok(())
    }
}
