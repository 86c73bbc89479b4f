//! Server-side identity of a socket
//!
//! Join, leave, send and typing requests act as the user recorded in the
//! registry for the socket, never as a user named by the client.

use chat_core::UserId;
use chat_service::ConnectionRegistry;

use super::{HandlerError, HandlerResult};
use crate::connection::{Connection, JoinRejection};

/// Outcome of checking a socket against its registry record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    Verified(UserId),
    /// No record (or an incomplete one) for this connection id
    Unregistered,
    /// The record names a different user than the handshake did
    Mismatch,
}

impl IdentityCheck {
    pub async fn resolve(
        registry: &ConnectionRegistry,
        connection: &Connection,
    ) -> HandlerResult<Self> {
        let check = match registry.get_metadata(connection.id()).await? {
            None => Self::Unregistered,
            Some(metadata) if &metadata.user_id == connection.user_id() => {
                Self::Verified(metadata.user_id)
            }
            Some(metadata) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    socket_user = %connection.user_id(),
                    registered_user = %metadata.user_id,
                    "Registry identity does not match socket"
                );
                Self::Mismatch
            }
        };
        Ok(check)
    }

    pub fn into_user(self) -> HandlerResult<UserId> {
        match self {
            Self::Verified(user_id) => Ok(user_id),
            Self::Unregistered => Err(HandlerError::NotAuthenticated),
            Self::Mismatch => Err(HandlerError::IdentityMismatch),
        }
    }

    /// Same as `into_user`, phrased as a join refusal
    pub fn into_member(self) -> Result<UserId, JoinRejection> {
        match self {
            Self::Verified(user_id) => Ok(user_id),
            Self::Unregistered => Err(JoinRejection::NotAuthenticated),
            Self::Mismatch => Err(JoinRejection::IdentityMismatch),
        }
    }
}
