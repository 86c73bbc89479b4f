//! Individual WebSocket connection
//!
//! Process-local handle of one socket: its identity, the writer channel and
//! the rooms it joined on this instance.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chat_core::{ConnectionId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{CloseCode, OutboundFrame};

/// A single WebSocket connection
pub struct Connection {
    id: ConnectionId,

    /// User authenticated at the handshake
    user_id: UserId,

    /// Channel to the socket writer task
    sender: mpsc::Sender<OutboundFrame>,

    /// Rooms joined on this instance
    rooms: RwLock<HashSet<String>>,

    /// Last frame received from the client
    last_activity: Mutex<Instant>,

    connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: ConnectionId, user_id: UserId, sender: mpsc::Sender<OutboundFrame>) -> Arc<Self> {
        Arc::new(Self {
            id,
            user_id,
            sender,
            rooms: RwLock::new(HashSet::new()),
            last_activity: Mutex::new(Instant::now()),
            connected_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Record client activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last client frame
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn rooms(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }

    /// Returns false when already joined
    pub(crate) fn add_room(&self, room: &str) -> bool {
        self.rooms.write().insert(room.to_string())
    }

    /// Returns false when not joined
    pub(crate) fn remove_room(&self, room: &str) -> bool {
        self.rooms.write().remove(room)
    }

    pub(crate) fn take_rooms(&self) -> Vec<String> {
        self.rooms.write().drain().collect()
    }

    /// Queue a frame, waiting for buffer space
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.sender.send(frame).await
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::TrySendError<OutboundFrame>> {
        self.sender.try_send(frame)
    }

    /// Ask the writer task to close the socket
    pub fn close(&self, code: CloseCode) {
        if self.try_send(OutboundFrame::Close(code)).is_err() {
            tracing::debug!(connection_id = %self.id, "Close frame not queued, writer gone or full");
        }
    }

    /// Check if the writer task has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("rooms", &self.rooms.read().len())
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
