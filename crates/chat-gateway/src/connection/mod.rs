//! Local connection table
//!
//! Sockets and room memberships owned by this gateway instance.

mod connection;
mod manager;
mod rooms;

pub use connection::Connection;
pub use manager::ConnectionManager;
pub use rooms::{JoinRejection, RoomChange};
