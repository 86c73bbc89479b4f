//! Gateway wire protocol
//!
//! JSON frames exchanged over the WebSocket and the close codes the gateway
//! uses.

mod close_codes;
mod frame;
mod payloads;

pub use close_codes::CloseCode;
pub use frame::{ack_error, ack_ok, AckFrame, ClientFrame, OutboundFrame};
pub use payloads::{first_validation_message, ConversationRequest, SendMessageRequest};
