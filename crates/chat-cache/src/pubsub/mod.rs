//! Redis Pub/Sub module.
//!
//! Carries cross-instance gateway emits between server processes.

mod bus;
mod channels;
mod publisher;
mod subscriber;

pub use bus::{InMemoryPubSub, PubSubBus, RedisPubSub};
pub use channels::{PubSubChannel, GATEWAY_EVENTS_CHANNEL};
pub use publisher::Publisher;
pub use subscriber::{
    ReceivedMessage, Subscriber, SubscriberBuilder, SubscriberConfig, SubscriberError,
    SubscriberResult,
};
