//! Connection manager
//!
//! Process-local socket table and room membership, backed by `DashMap`.
//! Nothing here is visible to other instances; cross-instance facts live in
//! the connection registry.

use std::collections::HashSet;
use std::sync::Arc;

use chat_core::{ConnectionId, EmitTarget, ServerEvent, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{Connection, RoomChange};
use crate::protocol::{CloseCode, OutboundFrame};

/// Manages the sockets owned by this instance
pub struct ConnectionManager {
    /// Active connections by id
    connections: DashMap<ConnectionId, Arc<Connection>>,

    /// Room name to member connection ids
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new local socket
    pub fn add_connection(
        &self,
        id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Arc<Connection> {
        let connection = Connection::new(id.clone(), user_id, sender);
        self.connections.insert(id.clone(), connection.clone());

        tracing::debug!(connection_id = %id, "Connection added");
        connection
    }

    /// Drop a socket and every room membership it held
    pub fn remove_connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(id)?;
        for room in connection.take_rooms() {
            self.detach(&room, id);
        }

        tracing::debug!(connection_id = %id, "Connection removed");
        Some(connection)
    }

    pub fn get_connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|r| r.clone())
    }

    pub fn has_connection(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Attach a socket to a room; `None` when the socket is gone
    pub fn join_room(&self, id: &ConnectionId, room: &str) -> Option<RoomChange> {
        let connection = self.get_connection(id)?;
        if !connection.add_room(room) {
            return Some(RoomChange::AlreadyMember);
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.clone());

        // Lost a race with remove_connection
        if !self.has_connection(id) {
            self.detach(room, id);
            return None;
        }

        tracing::trace!(connection_id = %id, room = %room, "Joined room");
        Some(RoomChange::Joined)
    }

    /// Detach a socket from a room
    pub fn leave_room(&self, id: &ConnectionId, room: &str) -> RoomChange {
        let was_member = self
            .get_connection(id)
            .is_some_and(|connection| connection.remove_room(room));
        self.detach(room, id);

        if was_member {
            tracing::trace!(connection_id = %id, room = %room, "Left room");
            RoomChange::Left
        } else {
            RoomChange::NotMember
        }
    }

    fn detach(&self, room: &str, id: &ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Local members of a room
    pub fn room_connections(&self, room: &str) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = self
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();

        ids.iter().filter_map(|id| self.get_connection(id)).collect()
    }

    /// Deliver an event to the local sockets matching `target`
    pub fn deliver(&self, target: &EmitTarget, event: &ServerEvent) -> usize {
        let recipients: Vec<Arc<Connection>> = match target {
            EmitTarget::Connection { connection_id } => {
                self.get_connection(connection_id).into_iter().collect()
            }
            EmitTarget::Room { room, except } => self
                .room_connections(room)
                .into_iter()
                .filter(|c| except.as_ref() != Some(c.id()))
                .collect(),
            EmitTarget::Broadcast => self.connections.iter().map(|r| r.clone()).collect(),
        };

        let mut sent = 0;
        for connection in recipients {
            match connection.try_send(OutboundFrame::Event(event.clone())) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        event = event.name(),
                        "Outbound buffer full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        tracing::trace!(event = event.name(), sent, "Event delivered locally");
        sent
    }

    /// Ask every local socket to close
    pub fn close_all(&self, code: CloseCode) -> usize {
        let mut closed = 0;
        for entry in &self.connections {
            entry.close(code);
            closed += 1;
        }
        if closed > 0 {
            tracing::info!(count = closed, code = %code, "Closing all connections");
        }
        closed
    }

    /// Number of local sockets
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of rooms with at least one local member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Local sockets of one user
    pub fn user_connections(&self, user_id: &UserId) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|r| r.user_id() == user_id)
            .map(|r| r.clone())
            .collect()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}
