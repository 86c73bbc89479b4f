//! `presence:heartbeat`

use std::sync::Arc;

use chat_core::PresenceTransition;
use serde_json::Value;

use super::identity::IdentityCheck;
use super::HandlerResult;
use crate::connection::Connection;
use crate::protocol::ack_ok;
use crate::server::GatewayState;

/// Refreshes the online marker of the socket's user
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    pub async fn handle(state: &GatewayState, connection: &Arc<Connection>) -> HandlerResult<Value> {
        let user_id = IdentityCheck::resolve(state.registry(), connection)
            .await?
            .into_user()?;

        let transition = state.presence().heartbeat(&user_id).await?;
        if transition == PresenceTransition::CameOnline {
            tracing::info!(user_id = %user_id, "Presence restored by heartbeat");
        } else {
            tracing::trace!(user_id = %user_id, "Heartbeat");
        }
        Ok(ack_ok())
    }
}
