//! Presence tracker
//!
//! Online state is a `user:{id}:online` marker that expires unless refreshed
//! by heartbeats; `user:{id}:last_seen` records the latest activity and never
//! moves backwards. Transitions are announced on the presence exchange.

use std::sync::Arc;
use std::time::Duration;

use chat_core::constants::{exchanges, keys};
use chat_core::events::PresenceChange;
use chat_core::{
    Clock, PresenceEvent, PresenceTransition, StateStore, StoreBatch, StoreError, UserId,
    UserPresence,
};
use chat_queue::EventPublisher;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, trace, warn};

use super::error::ServiceResult;

/// Marker value stored under the online key
const ONLINE_MARKER: &str = "true";

/// Tracks online/offline state and last activity per user
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    server_id: String,
    publisher: Option<EventPublisher>,
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("ttl", &self.ttl)
            .field("server_id", &self.server_id)
            .field("publishes", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            server_id: server_id.into(),
            publisher: None,
        }
    }

    /// Announce transitions on the presence exchange
    #[must_use]
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark a user online, refreshing the marker TTL
    #[instrument(skip(self))]
    pub async fn set_online(&self, user_id: &UserId) -> ServiceResult<PresenceTransition> {
        let transition = self.touch(user_id).await?;
        if transition.is_change() {
            info!(user_id = %user_id, "User online");
        }
        Ok(transition)
    }

    /// Client keep-alive; re-creates a lapsed marker
    pub async fn heartbeat(&self, user_id: &UserId) -> ServiceResult<PresenceTransition> {
        let transition = self.touch(user_id).await?;
        trace!(user_id = %user_id, ?transition, "Heartbeat");
        Ok(transition)
    }

    /// Clear the online marker and stamp `lastSeen`
    #[instrument(skip(self))]
    pub async fn set_offline(&self, user_id: &UserId) -> ServiceResult<PresenceTransition> {
        let now = self.clock.now();
        let was_online = self.is_online(user_id).await?;

        let mut batch = StoreBatch::new().del(keys::user_online(user_id));
        if let Some(stamp) = self.last_seen_write(user_id, now).await? {
            batch = batch.set(keys::user_last_seen(user_id), stamp);
        }
        self.store.apply(batch).await?;

        if !was_online {
            return Ok(PresenceTransition::AlreadyOffline);
        }

        info!(user_id = %user_id, "User offline");
        self.announce(PresenceEvent::Offline(self.change(user_id, now)))
            .await;
        Ok(PresenceTransition::WentOffline)
    }

    /// Whether the online marker is present and unexpired
    pub async fn is_online(&self, user_id: &UserId) -> ServiceResult<bool> {
        Ok(self.store.exists(&keys::user_online(user_id)).await?)
    }

    pub async fn get_last_seen(&self, user_id: &UserId) -> ServiceResult<Option<DateTime<Utc>>> {
        let key = keys::user_last_seen(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| {
                StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }
                .into()
            })
    }

    pub async fn get_presence(&self, user_id: &UserId) -> ServiceResult<UserPresence> {
        Ok(UserPresence {
            user_id: user_id.clone(),
            online: self.is_online(user_id).await?,
            last_seen: self.get_last_seen(user_id).await?,
        })
    }

    pub async fn get_bulk_presence(&self, user_ids: &[UserId]) -> ServiceResult<Vec<UserPresence>> {
        let mut out = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            out.push(self.get_presence(user_id).await?);
        }
        Ok(out)
    }

    /// Shared online/heartbeat write
    async fn touch(&self, user_id: &UserId) -> ServiceResult<PresenceTransition> {
        let now = self.clock.now();
        let was_online = self.is_online(user_id).await?;

        let mut batch = StoreBatch::new().set_ex(keys::user_online(user_id), ONLINE_MARKER, self.ttl);
        if let Some(stamp) = self.last_seen_write(user_id, now).await? {
            batch = batch.set(keys::user_last_seen(user_id), stamp);
        }
        self.store.apply(batch).await?;

        if was_online {
            return Ok(PresenceTransition::Refreshed);
        }
        self.announce(PresenceEvent::Online(self.change(user_id, now)))
            .await;
        Ok(PresenceTransition::CameOnline)
    }

    /// RFC 3339 stamp to write, or `None` when a later one is already stored
    async fn last_seen_write(&self, user_id: &UserId, at: DateTime<Utc>) -> ServiceResult<Option<String>> {
        let current = match self.get_last_seen(user_id).await {
            Ok(current) => current,
            // An unreadable value gets overwritten
            Err(_) => None,
        };
        if current.is_some_and(|current| current >= at) {
            return Ok(None);
        }
        Ok(Some(at.to_rfc3339()))
    }

    fn change(&self, user_id: &UserId, at: DateTime<Utc>) -> PresenceChange {
        PresenceChange {
            user_id: user_id.clone(),
            last_seen: Some(at),
            server_id: self.server_id.clone(),
            timestamp: at,
        }
    }

    /// Best effort; presence state is already written
    async fn announce(&self, event: PresenceEvent) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(e) = publisher
            .publish(exchanges::PRESENCE, event.routing_key(), &event, None)
            .await
        {
            warn!(
                user_id = %event.change().user_id,
                error = %e,
                "Failed to publish presence event"
            );
        }
    }
}
