//! # chat-gateway
//!
//! WebSocket gateway for real-time message delivery: handshake
//! authentication, client event dispatch, room membership, cross-instance
//! emits, broker consumers and operator endpoints.

pub mod api;
pub mod broadcast;
pub mod connection;
pub mod consumers;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use server::{create_app, run, serve, GatewayRuntime, GatewayState, Infrastructure};
