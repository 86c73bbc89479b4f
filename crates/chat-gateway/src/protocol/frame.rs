//! Socket framing
//!
//! Client frames are `{"event", "data", "ackId"?}`. The server answers a
//! frame carrying an `ackId` with `{"event": "ack", "ackId", "data"}` and
//! pushes `ServerEvent`s in the same `{event, data}` shape.

use chat_core::constants::client_events;
use chat_core::ServerEvent;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::CloseCode;

/// A frame received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

impl ClientFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ack_id: None,
        }
    }

    #[must_use]
    pub fn with_ack(mut self, ack_id: u64) -> Self {
        self.ack_id = Some(ack_id);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode `data`; a missing body decodes like `{}`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Value::Null => serde_json::from_value(json!({})),
            data => T::deserialize(data),
        }
    }
}

/// Reply to a client frame that asked for an acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub event: String,
    pub ack_id: u64,
    pub data: Value,
}

impl AckFrame {
    pub fn new(ack_id: u64, data: Value) -> Self {
        Self {
            event: client_events::ACK.to_string(),
            ack_id,
            data,
        }
    }

    pub fn success(&self) -> bool {
        self.data.get("success").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Minimal successful acknowledgement body
pub fn ack_ok() -> Value {
    json!({ "success": true })
}

/// Failed acknowledgement body
pub fn ack_error(error: impl Into<String>) -> Value {
    json!({ "success": false, "error": error.into() })
}

/// Everything the writer task of a socket can be asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Event(ServerEvent),
    Ack(AckFrame),
    Close(CloseCode),
}

impl OutboundFrame {
    /// JSON text for data frames; `None` for control frames
    pub fn to_text(&self) -> Result<Option<String>, serde_json::Error> {
        match self {
            Self::Event(event) => serde_json::to_string(event).map(Some),
            Self::Ack(ack) => serde_json::to_string(ack).map(Some),
            Self::Close(_) => Ok(None),
        }
    }
}

impl From<ServerEvent> for OutboundFrame {
    fn from(event: ServerEvent) -> Self {
        Self::Event(event)
    }
}
