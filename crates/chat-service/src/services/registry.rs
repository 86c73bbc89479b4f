//! Connection registry
//!
//! Bookkeeping of which connections belong to which user and which server,
//! kept in the shared state store so every gateway instance sees it.

use std::sync::Arc;

use chat_core::constants::keys;
use chat_core::{
    ClientInfo, Clock, ConnectionId, ConnectionMetadata, ConnectionStats, StateStore, StoreBatch,
    StoreError, StoreGuard, UnregisterOutcome, UserId,
};
use tracing::{debug, info, instrument, warn};

use super::error::ServiceResult;

/// Registry of live connections across all gateway instances
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    server_id: String,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create a registry for the instance identified by `server_id`
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, server_id: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            server_id: server_id.into(),
        }
    }

    /// Instance that owns connections registered through this registry
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Record a new connection owned by this server.
    ///
    /// All writes go out as one atomic batch. The global counter is bumped
    /// only by the batch that creates the metadata hash, so registering the
    /// same connection again refreshes its metadata without counting it twice.
    #[instrument(skip(self, info), fields(server_id = %self.server_id))]
    pub async fn register(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        info: ClientInfo,
    ) -> ServiceResult<ConnectionMetadata> {
        let metadata = ConnectionMetadata::new(
            connection_id.clone(),
            user_id.clone(),
            self.server_id.clone(),
            self.clock.now(),
            info,
        );

        let connection_key = keys::connection(connection_id);
        let writes = StoreBatch::new()
            .sadd(keys::user_connections(user_id), connection_id.as_str())
            .hset_all(connection_key.clone(), metadata.to_fields())
            .sadd(keys::server_connections(&self.server_id), connection_id.as_str())
            .sadd(keys::ONLINE_USERS, user_id.as_str());

        // Either the hash is absent and this batch counts the connection, or it
        // is present and the refresh leaves the counter alone
        loop {
            let created = self
                .store
                .apply_if(
                    StoreGuard::missing(connection_key.clone()),
                    writes.clone().incr(keys::TOTAL_CONNECTIONS),
                )
                .await?;
            if created {
                break;
            }
            let refreshed = self
                .store
                .apply_if(StoreGuard::exists(connection_key.clone()), writes.clone())
                .await?;
            if refreshed {
                debug!(connection_id = %connection_id, "Connection re-registered");
                break;
            }
        }

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection registered"
        );
        Ok(metadata)
    }

    /// Remove a connection.
    ///
    /// Unknown connections are a no-op. The removal batch is guarded on the
    /// metadata hash still existing, so of several concurrent calls for one
    /// connection exactly one decrements the global counter. The user leaves
    /// the online set only when the count read after the removal is zero.
    #[instrument(skip(self))]
    pub async fn unregister(&self, connection_id: &ConnectionId) -> ServiceResult<UnregisterOutcome> {
        let Some(metadata) = self.get_metadata(connection_id).await? else {
            warn!(
                connection_id = %connection_id,
                "Connection metadata not found, already unregistered"
            );
            return Ok(UnregisterOutcome::NotFound);
        };

        let user_id = metadata.user_id;
        let batch = StoreBatch::new()
            .srem(keys::user_connections(&user_id), connection_id.as_str())
            .del(keys::connection(connection_id))
            .srem(keys::server_connections(&metadata.server_id), connection_id.as_str())
            .decr(keys::TOTAL_CONNECTIONS);
        let removed = self
            .store
            .apply_if(StoreGuard::exists(keys::connection(connection_id)), batch)
            .await?;
        if !removed {
            warn!(
                connection_id = %connection_id,
                "Connection unregistered concurrently, skipping"
            );
            return Ok(UnregisterOutcome::NotFound);
        }

        let remaining = self.store.scard(&keys::user_connections(&user_id)).await?;
        if remaining == 0 {
            self.store
                .apply(StoreBatch::new().srem(keys::ONLINE_USERS, user_id.as_str()))
                .await?;
        }

        info!(
            user_id = %user_id,
            connection_id = %connection_id,
            remaining,
            "Connection unregistered"
        );
        Ok(UnregisterOutcome::Removed { user_id, remaining })
    }

    /// Connection ids of a user; empty for unknown users
    pub async fn get_connections(&self, user_id: &UserId) -> ServiceResult<Vec<ConnectionId>> {
        let members = self.store.smembers(&keys::user_connections(user_id)).await?;
        Ok(members.into_iter().map(ConnectionId::from).collect())
    }

    /// Number of live connections of a user
    pub async fn connection_count(&self, user_id: &UserId) -> ServiceResult<u64> {
        Ok(self.store.scard(&keys::user_connections(user_id)).await?)
    }

    pub async fn get_metadata(&self, connection_id: &ConnectionId) -> ServiceResult<Option<ConnectionMetadata>> {
        let fields = self.store.hgetall(&keys::connection(connection_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let metadata = ConnectionMetadata::from_fields(connection_id, &fields);
        if metadata.is_none() {
            debug!(connection_id = %connection_id, "Incomplete connection metadata ignored");
        }
        Ok(metadata)
    }

    /// Whether the user has at least one registered connection
    pub async fn is_online(&self, user_id: &UserId) -> ServiceResult<bool> {
        Ok(self.store.sismember(keys::ONLINE_USERS, user_id.as_str()).await?)
    }

    pub async fn get_online_users(&self) -> ServiceResult<Vec<UserId>> {
        let members = self.store.smembers(keys::ONLINE_USERS).await?;
        Ok(members.into_iter().map(UserId::from).collect())
    }

    /// Global live-connection counter; 0 when never written
    pub async fn get_total_connections(&self) -> ServiceResult<i64> {
        match self.store.get(keys::TOTAL_CONNECTIONS).await? {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                StoreError::Corrupt {
                    key: keys::TOTAL_CONNECTIONS.to_string(),
                    reason: format!("not an integer: {raw}"),
                }
                .into()
            }),
        }
    }

    pub async fn get_server_connections(&self, server_id: &str) -> ServiceResult<Vec<ConnectionId>> {
        let members = self.store.smembers(&keys::server_connections(server_id)).await?;
        Ok(members.into_iter().map(ConnectionId::from).collect())
    }

    /// Connections owned by this instance
    pub async fn get_current_server_connections(&self) -> ServiceResult<Vec<ConnectionId>> {
        self.get_server_connections(&self.server_id).await
    }

    pub async fn get_stats(&self) -> ServiceResult<ConnectionStats> {
        let total_connections = self.get_total_connections().await?;
        let online_users = self.store.scard(keys::ONLINE_USERS).await?;
        let current_server_connections = self
            .store
            .scard(&keys::server_connections(&self.server_id))
            .await?;

        Ok(ConnectionStats {
            server_id: self.server_id.clone(),
            total_connections,
            online_users,
            current_server_connections,
            timestamp: self.clock.now(),
        })
    }
}
