//! # chat-service
//!
//! Application layer: who is connected where, who is online, and how broker
//! events become socket events.

pub mod services;
pub mod testing;

pub use services::{
    ConnectionLifecycle, ConnectionRegistry, DeliveryHandler, DeliveryReport, OfflineInbox,
    PresenceEventHandler, PresenceTracker, ServiceError, ServiceResult,
};
