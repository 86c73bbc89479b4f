//! Connect/disconnect orchestration over the registry and presence tracker

use chat_core::{ClientInfo, ConnectionId, ConnectionMetadata, UnregisterOutcome, UserId};
use tracing::{error, info};

use super::error::ServiceResult;
use super::presence::PresenceTracker;
use super::registry::ConnectionRegistry;

/// Registry and presence updates for a socket's lifetime
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    registry: ConnectionRegistry,
    presence: PresenceTracker,
}

impl ConnectionLifecycle {
    pub fn new(registry: ConnectionRegistry, presence: PresenceTracker) -> Self {
        Self { registry, presence }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Register an authenticated socket and mark its user online.
    ///
    /// When the presence write fails the registration is rolled back.
    pub async fn connect(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        info: ClientInfo,
    ) -> ServiceResult<ConnectionMetadata> {
        let metadata = self.registry.register(user_id, connection_id, info).await?;

        if let Err(e) = self.presence.set_online(user_id).await {
            if let Err(rollback) = self.registry.unregister(connection_id).await {
                error!(
                    connection_id = %connection_id,
                    error = %rollback,
                    "Failed to roll back registration"
                );
            }
            return Err(e);
        }

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            server_id = %metadata.server_id,
            "User connected"
        );
        Ok(metadata)
    }

    /// Unregister a socket; the user goes offline with its last connection
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> ServiceResult<UnregisterOutcome> {
        let outcome = self.registry.unregister(connection_id).await?;

        if let UnregisterOutcome::Removed { user_id, remaining } = &outcome {
            if *remaining == 0 {
                self.presence.set_offline(user_id).await?;
            }
            info!(
                user_id = %user_id,
                connection_id = %connection_id,
                remaining,
                "User disconnected"
            );
        }
        Ok(outcome)
    }
}
