//! Client request bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Body of `conversation:join`, `conversation:leave` and `typing:*`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Conversation ID required"))]
    pub conversation_id: String,
}

/// Body of `message:send`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Missing required fields: conversationId and content"))]
    pub conversation_id: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Missing required fields: conversationId and content"))]
    pub content: String,

    #[serde(rename = "type", default)]
    pub message_type: Option<String>,

    #[serde(default)]
    pub metadata: Option<Value>,
}

/// First human-readable message in a set of validation errors
pub fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| {
            e.message
                .as_ref()
                .map_or_else(|| e.code.to_string(), ToString::to_string)
        })
        .collect();
    messages.sort();
    messages
        .into_iter()
        .next()
        .unwrap_or_else(|| "Invalid request".to_string())
}
