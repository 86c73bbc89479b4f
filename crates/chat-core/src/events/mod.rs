//! Events - broker payloads consumed/produced by this subsystem and the
//! socket events pushed to clients

mod chat_event;
mod presence_event;
mod server_event;

pub use chat_event::{
    ChatEvent, MessageConfirmedEvent, MessageCreateErrorEvent, MessageCreateRequest,
    MessageSentEvent,
};
pub use presence_event::{PresenceChange, PresenceEvent};
pub use server_event::{
    ConnectionErrorPayload, ConnectionSuccess, MessageConfirmed, MessageError, MessageNew,
    PresenceUpdate, ServerEvent, TypingUpdate,
};
