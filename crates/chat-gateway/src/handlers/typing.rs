//! `typing:start` / `typing:stop`

use std::sync::Arc;

use chat_core::constants::rooms;
use chat_core::events::TypingUpdate;
use chat_core::{EmitTarget, ServerEvent};
use serde_json::Value;
use validator::Validate;

use super::identity::IdentityCheck;
use super::{HandlerError, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{ack_ok, ClientFrame, ConversationRequest};
use crate::server::GatewayState;

pub struct TypingHandler;

impl TypingHandler {
    /// Tell the rest of the room; the typing socket itself is skipped
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        frame: &ClientFrame,
        is_typing: bool,
    ) -> HandlerResult<Value> {
        let user_id = IdentityCheck::resolve(state.registry(), connection)
            .await?
            .into_user()?;

        let request: ConversationRequest = frame.payload()?;
        request.validate()?;

        let room = rooms::conversation(&request.conversation_id);
        if !connection.in_room(&room) {
            return Err(HandlerError::NotInRoom(room));
        }

        let event = ServerEvent::TypingUpdate(TypingUpdate {
            conversation_id: request.conversation_id,
            user_id,
            is_typing,
        });
        state
            .emitter()
            .emit(EmitTarget::room_except(room, connection.id().clone()), event)
            .await?;
        Ok(ack_ok())
    }
}
