//! # chat-core
//!
//! Domain layer for the real-time delivery subsystem: identifiers, connection
//! and presence records, broker and socket event payloads, shared names, and
//! the ports (`StateStore`, `EventEmitter`, `Clock`) that infrastructure
//! crates implement.

pub mod constants;
pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    ClientInfo, ConnectionMetadata, ConnectionStats, PresenceStatus, PresenceTransition,
    UnregisterOutcome, UserPresence,
};
pub use error::{EmitError, StoreError};
pub use events::{ChatEvent, PresenceEvent, ServerEvent};
pub use traits::{
    Clock, EmitTarget, EventEmitter, ManualClock, StateStore, StoreBatch, StoreGuard, StoreOp,
    StoreResult, SystemClock,
};
pub use value_objects::{ConnectionId, UserId};
