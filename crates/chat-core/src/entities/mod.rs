//! Domain entities - connection and presence records

mod connection;
mod presence;

pub use connection::{
    fields as connection_fields, ClientInfo, ConnectionMetadata, ConnectionStats,
    UnregisterOutcome,
};
pub use presence::{PresenceStatus, PresenceTransition, UserPresence};
