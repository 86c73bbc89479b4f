//! Client event handlers
//!
//! Routes each client frame to its handler by event name. Every handler
//! returns the body of the acknowledgement sent back when the frame carried
//! an `ackId`.

mod conversation;
mod error;
mod identity;
mod message;
mod presence;
mod typing;

pub use conversation::ConversationHandler;
pub use error::{HandlerError, HandlerResult};
pub use identity::IdentityCheck;
pub use message::SendMessageHandler;
pub use presence::HeartbeatHandler;
pub use typing::TypingHandler;

use crate::connection::Connection;
use crate::protocol::ClientFrame;
use crate::server::GatewayState;
use chat_core::constants::client_events;
use serde_json::Value;
use std::sync::Arc;

/// Dispatch incoming client frames to appropriate handlers
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle one client frame
    pub async fn dispatch(
        state: &GatewayState,
        connection: &Arc<Connection>,
        frame: &ClientFrame,
    ) -> HandlerResult<Value> {
        tracing::trace!(
            connection_id = %connection.id(),
            event = %frame.event,
            "Received frame"
        );

        match frame.event.as_str() {
            client_events::CONVERSATION_JOIN => {
                ConversationHandler::join(state, connection, frame).await
            }
            client_events::CONVERSATION_LEAVE => {
                ConversationHandler::leave(state, connection, frame).await
            }
            client_events::MESSAGE_SEND => SendMessageHandler::handle(state, connection, frame).await,
            client_events::PRESENCE_HEARTBEAT => HeartbeatHandler::handle(state, connection).await,
            client_events::TYPING_START => {
                TypingHandler::handle(state, connection, frame, true).await
            }
            client_events::TYPING_STOP => {
                TypingHandler::handle(state, connection, frame, false).await
            }
            other => Err(HandlerError::UnknownEvent(other.to_string())),
        }
    }
}
