//! Service layer
//!
//! Connection registry, presence tracking, and the broker-driven delivery
//! handlers. Services talk to infrastructure only through the `chat-core`
//! ports, so every instance can run any of them.

mod delivery;
mod error;
mod inbox;
mod lifecycle;
mod presence;
mod presence_events;
mod registry;

pub use delivery::{DeliveryHandler, DeliveryReport};
pub use error::{ServiceError, ServiceResult};
pub use inbox::OfflineInbox;
pub use lifecycle::ConnectionLifecycle;
pub use presence::PresenceTracker;
pub use presence_events::PresenceEventHandler;
pub use registry::ConnectionRegistry;
