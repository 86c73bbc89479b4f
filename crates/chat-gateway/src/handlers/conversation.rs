//! `conversation:join` / `conversation:leave`

use std::sync::Arc;

use chat_core::constants::rooms;
use serde_json::Value;
use validator::Validate;

use super::identity::IdentityCheck;
use super::HandlerResult;
use crate::connection::{Connection, JoinRejection, RoomChange};
use crate::protocol::{ack_ok, ClientFrame, ConversationRequest};
use crate::server::GatewayState;

/// Handles room membership requests
pub struct ConversationHandler;

impl ConversationHandler {
    /// Attach the socket to `conversation:{id}` on this instance
    pub async fn join(
        state: &GatewayState,
        connection: &Arc<Connection>,
        frame: &ClientFrame,
    ) -> HandlerResult<Value> {
        let user_id = IdentityCheck::resolve(state.registry(), connection)
            .await?
            .into_member()?;

        let request: ConversationRequest = frame.payload()?;
        request
            .validate()
            .map_err(|_| JoinRejection::MissingConversationId)?;

        let room = rooms::conversation(&request.conversation_id);
        let change = state
            .connections()
            .join_room(connection.id(), &room)
            .ok_or(JoinRejection::ConnectionClosed)?;

        if change == RoomChange::Joined {
            tracing::info!(
                user_id = %user_id,
                connection_id = %connection.id(),
                conversation_id = %request.conversation_id,
                "Joined conversation"
            );
        }
        Ok(ack_ok())
    }

    /// Detach the socket from the room; leaving a room never joined succeeds
    pub async fn leave(
        state: &GatewayState,
        connection: &Arc<Connection>,
        frame: &ClientFrame,
    ) -> HandlerResult<Value> {
        let user_id = IdentityCheck::resolve(state.registry(), connection)
            .await?
            .into_user()?;

        let request: ConversationRequest = frame.payload()?;
        request.validate()?;

        let room = rooms::conversation(&request.conversation_id);
        if state.connections().leave_room(connection.id(), &room).changed() {
            tracing::info!(
                user_id = %user_id,
                connection_id = %connection.id(),
                conversation_id = %request.conversation_id,
                "Left conversation"
            );
        }
        Ok(ack_ok())
    }
}
