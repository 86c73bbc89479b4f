//! Cross-instance emit port
//!
//! Delivery code addresses connections and rooms without knowing which
//! gateway instance owns the socket; the implementation fans the event out
//! to every instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EmitError;
use crate::events::ServerEvent;
use crate::value_objects::ConnectionId;

/// Who should receive an emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmitTarget {
    /// One socket, wherever it lives
    Connection { connection_id: ConnectionId },
    /// Every socket joined to a room, optionally skipping one
    Room {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        except: Option<ConnectionId>,
    },
    /// Every connected socket on every instance
    Broadcast,
}

impl EmitTarget {
    pub fn connection(connection_id: ConnectionId) -> Self {
        Self::Connection { connection_id }
    }

    pub fn room(room: impl Into<String>) -> Self {
        Self::Room {
            room: room.into(),
            except: None,
        }
    }

    pub fn room_except(room: impl Into<String>, except: ConnectionId) -> Self {
        Self::Room {
            room: room.into(),
            except: Some(except),
        }
    }
}

#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, target: EmitTarget, event: ServerEvent) -> Result<(), EmitError>;
}
