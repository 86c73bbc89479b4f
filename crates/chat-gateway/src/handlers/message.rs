//! `message:send`
//!
//! The gateway does not persist messages. It queues a create request with a
//! provisional id and acknowledges at once; the persisted id arrives later
//! as `message:confirmed` (or `message:error`).

use std::sync::Arc;

use chat_core::constants::{exchanges, routing_keys};
use chat_core::events::MessageCreateRequest;
use chat_core::ChatEvent;
use serde_json::{json, Value};
use validator::Validate;

use super::identity::IdentityCheck;
use super::HandlerResult;
use crate::connection::Connection;
use crate::protocol::{ClientFrame, SendMessageRequest};
use crate::server::GatewayState;

const DEFAULT_MESSAGE_TYPE: &str = "text";

pub struct SendMessageHandler;

impl SendMessageHandler {
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        frame: &ClientFrame,
    ) -> HandlerResult<Value> {
        let sender_id = IdentityCheck::resolve(state.registry(), connection)
            .await?
            .into_user()?;

        let request: SendMessageRequest = frame.payload()?;
        request.validate()?;

        let timestamp = state.clock().now();
        let temp_message_id = MessageCreateRequest::temp_id(&sender_id, timestamp);

        let event = ChatEvent::MessageCreateRequest(MessageCreateRequest {
            temp_message_id: temp_message_id.clone(),
            conversation_id: request.conversation_id.clone(),
            sender_id: sender_id.clone(),
            content: request.content,
            message_type: request
                .message_type
                .unwrap_or_else(|| DEFAULT_MESSAGE_TYPE.to_string()),
            metadata: Some(request.metadata.unwrap_or_else(|| json!({}))),
            timestamp,
        });

        state
            .publisher()
            .publish(
                exchanges::CHAT,
                routing_keys::MESSAGE_CREATE_REQUEST,
                &event,
                Some(&temp_message_id),
            )
            .await?;

        tracing::debug!(
            sender_id = %sender_id,
            conversation_id = %request.conversation_id,
            temp_message_id = %temp_message_id,
            "Message queued for persistence"
        );

        Ok(json!({
            "success": true,
            "messageId": temp_message_id,
            "timestamp": timestamp,
        }))
    }
}
