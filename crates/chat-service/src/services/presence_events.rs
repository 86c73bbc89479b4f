//! Presence fan-out
//!
//! Turns presence transitions from the presence exchange into
//! `presence:update` broadcasts for every connected client.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::events::PresenceUpdate;
use chat_core::{EmitTarget, EventEmitter, PresenceEvent, ServerEvent};
use chat_queue::{MessageContext, MessageHandler, ProcessError};
use tracing::debug;

use super::error::ServiceResult;

/// Handler for `presence-events-queue`
#[derive(Clone)]
pub struct PresenceEventHandler {
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for PresenceEventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceEventHandler").finish_non_exhaustive()
    }
}

impl PresenceEventHandler {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self { emitter }
    }

    pub async fn handle(&self, event: PresenceEvent) -> ServiceResult<()> {
        let change = event.change();
        let update = ServerEvent::PresenceUpdate(PresenceUpdate {
            user_id: change.user_id.clone(),
            status: event.status(),
            last_seen: change.last_seen,
        });
        self.emitter.emit(EmitTarget::Broadcast, update).await?;
        debug!(
            user_id = %change.user_id,
            routing_key = event.routing_key(),
            origin = %change.server_id,
            "Presence update broadcast"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for PresenceEventHandler {
    type Event = PresenceEvent;

    fn name(&self) -> &'static str {
        "presence-events"
    }

    async fn process(&self, event: PresenceEvent, _ctx: &MessageContext) -> Result<(), ProcessError> {
        self.handle(event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingEmitter;
    use chat_core::PresenceStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_offline_event_is_broadcast() {
        let emitter = Arc::new(RecordingEmitter::new());
        let handler = PresenceEventHandler::new(emitter.clone());

        let event: PresenceEvent = serde_json::from_value(json!({
            "eventType": "presence.offline",
            "userId": "u1",
            "lastSeen": "2024-05-01T12:00:00Z",
            "serverId": "s2",
            "timestamp": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        handler.handle(event).await.unwrap();

        let emitted = emitter.emitted();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, EmitTarget::Broadcast);
        let ServerEvent::PresenceUpdate(update) = &emitted[0].1 else {
            panic!("expected presence:update");
        };
        assert_eq!(update.status, PresenceStatus::Offline);
        assert!(update.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_emit_failure_surfaces() {
        let emitter = Arc::new(RecordingEmitter::new());
        emitter.fail_next(1);
        let handler = PresenceEventHandler::new(emitter);

        let event: PresenceEvent = serde_json::from_value(json!({
            "eventType": "presence.online",
            "userId": "u1",
            "serverId": "s1",
            "timestamp": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        assert!(handler.handle(event).await.is_err());
    }
}
