//! Server -> client socket events
//!
//! Serialized as `{"event": "<name>", "data": {...}}`, which is both the
//! client wire frame and the body of cross-instance broadcast envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::PresenceStatus;
use crate::value_objects::{ConnectionId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection:success")]
    ConnectionSuccess(ConnectionSuccess),

    #[serde(rename = "connection:error")]
    ConnectionError(ConnectionErrorPayload),

    #[serde(rename = "message:new")]
    MessageNew(MessageNew),

    #[serde(rename = "message:confirmed")]
    MessageConfirmed(MessageConfirmed),

    #[serde(rename = "message:error")]
    MessageError(MessageError),

    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdate),

    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),
}

impl ServerEvent {
    /// Event name as seen by clients
    pub fn name(&self) -> &'static str {
        use crate::constants::client_events;
        match self {
            Self::ConnectionSuccess(_) => client_events::CONNECTION_SUCCESS,
            Self::ConnectionError(_) => client_events::CONNECTION_ERROR,
            Self::MessageNew(_) => client_events::MESSAGE_NEW,
            Self::MessageConfirmed(_) => client_events::MESSAGE_CONFIRMED,
            Self::MessageError(_) => client_events::MESSAGE_ERROR,
            Self::PresenceUpdate(_) => client_events::PRESENCE_UPDATE,
            Self::TypingUpdate(_) => client_events::TYPING_UPDATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSuccess {
    pub user_id: UserId,
    pub socket_id: ConnectionId,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionErrorPayload {
    pub error: String,
}

/// A persisted message delivered to a recipient connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNew {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub metadata: Value,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfirmed {
    pub temp_message_id: Option<String>,
    pub real_message_id: String,
    pub conversation_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub temp_message_id: String,
    pub error: String,
    pub conversation_id: Option<String>,
}

impl MessageError {
    pub const DEFAULT_ERROR: &'static str = "Failed to send message";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: String,
    pub user_id: UserId,
    pub is_typing: bool,
}
