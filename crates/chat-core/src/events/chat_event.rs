//! Chat message lifecycle events carried on the chat exchange
//!
//! Payloads are produced by the persistence pipeline (outside this workspace)
//! and discriminated by the `eventType` field. Identifier fields default to
//! empty so a structurally valid but incomplete event can be rejected by the
//! handler instead of failing to parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::UserId;

/// Every event the chat exchange can carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum ChatEvent {
    #[serde(rename = "message.sent")]
    MessageSent(MessageSentEvent),

    #[serde(rename = "message.confirmed")]
    MessageConfirmed(MessageConfirmedEvent),

    #[serde(rename = "message.create-error")]
    MessageCreateError(MessageCreateErrorEvent),

    #[serde(rename = "message.create-request")]
    MessageCreateRequest(MessageCreateRequest),

    /// Any `eventType` this build does not know about
    #[serde(other)]
    Unknown,
}

impl ChatEvent {
    /// The `eventType` discriminator for logging
    pub fn event_type(&self) -> &'static str {
        use crate::constants::event_types;
        match self {
            Self::MessageSent(_) => event_types::MESSAGE_SENT,
            Self::MessageConfirmed(_) => event_types::MESSAGE_CONFIRMED,
            Self::MessageCreateError(_) => event_types::MESSAGE_CREATE_ERROR,
            Self::MessageCreateRequest(_) => event_types::MESSAGE_CREATE_REQUEST,
            Self::Unknown => "unknown",
        }
    }
}

fn default_message_type() -> String {
    "text".to_string()
}

/// A message was persisted and must be fanned out to its participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentEvent {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: UserId,
    /// Authoritative recipient list computed by the persistence layer
    #[serde(default)]
    pub participants: Option<Vec<UserId>>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageSentEvent {
    /// Returns the first missing required field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.message_id.trim().is_empty() {
            Some("messageId")
        } else if self.conversation_id.trim().is_empty() {
            Some("conversationId")
        } else if self.sender_id.is_blank() {
            Some("senderId")
        } else if self.participants.is_none() {
            Some("participants")
        } else {
            None
        }
    }

    /// Participants other than the sender, without duplicates
    pub fn recipients(&self) -> Vec<UserId> {
        let mut out: Vec<UserId> = Vec::new();
        for user in self.participants.iter().flatten() {
            if *user != self.sender_id && !user.is_blank() && !out.contains(user) {
                out.push(user.clone());
            }
        }
        out
    }
}

/// Persistence confirmed an optimistic send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfirmedEvent {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub sender_id: UserId,
    #[serde(default)]
    pub temp_message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl MessageConfirmedEvent {
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.message_id.trim().is_empty() {
            Some("messageId")
        } else if self.sender_id.is_blank() {
            Some("senderId")
        } else {
            None
        }
    }
}

/// Persistence rejected a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreateErrorEvent {
    #[serde(default)]
    pub temp_message_id: String,
    #[serde(default)]
    pub sender_id: UserId,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl MessageCreateErrorEvent {
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.temp_message_id.trim().is_empty() {
            Some("tempMessageId")
        } else if self.sender_id.is_blank() {
            Some("senderId")
        } else {
            None
        }
    }
}

/// Request to persist a message, published by the gateway on `message:send`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreateRequest {
    pub temp_message_id: String,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl MessageCreateRequest {
    /// Provisional id handed back to the sender until persistence confirms
    pub fn temp_id(sender_id: &UserId, at: DateTime<Utc>) -> String {
        format!("temp:{}:{}", at.timestamp_millis(), sender_id)
    }
}
