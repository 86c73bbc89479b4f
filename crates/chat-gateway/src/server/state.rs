//! Gateway state
//!
//! Application state for the gateway server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chat_cache::{
    InMemoryPubSub, InMemoryStateStore, PubSubBus, PubSubChannel, RedisPool, RedisPoolConfig,
    RedisPubSub, RedisStateStore, SubscriberConfig,
};
use chat_common::{AppConfig, AppError, JwtService};
use chat_core::{Clock, EventEmitter, StateStore, SystemClock};
use chat_queue::{BrokerChannel, EventPublisher, InMemoryBroker, RedisBroker};
use chat_service::{
    ConnectionLifecycle, ConnectionRegistry, DeliveryHandler, OfflineInbox, PresenceEventHandler,
    PresenceTracker,
};

use crate::broadcast::ClusterBroadcaster;
use crate::connection::ConnectionManager;

/// Shared infrastructure behind the ports
#[derive(Clone)]
pub struct Infrastructure {
    pub store: Arc<dyn StateStore>,
    pub broker: Arc<dyn BrokerChannel>,
    pub bus: Arc<dyn PubSubBus>,
    pub clock: Arc<dyn Clock>,
}

impl Infrastructure {
    /// Single-process adapters; nothing is shared with other processes
    pub fn in_memory() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(InMemoryStateStore::with_clock(clock.clone())),
            broker: Arc::new(InMemoryBroker::new()),
            bus: Arc::new(InMemoryPubSub::default()),
            clock,
        }
    }

    /// Connect every adapter to Redis; any unreachable piece fails startup
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis...");
        let pool = RedisPool::connect(RedisPoolConfig::from(&config.redis))
            .await
            .map_err(|e| AppError::Unavailable(format!("Redis: {e}")))?;

        let store = RedisStateStore::new(pool.clone());
        store.ping().await?;

        let broker = RedisBroker::new(pool.clone(), config.app.server_id.clone());
        broker
            .ping()
            .await
            .map_err(|e| AppError::Broker(e.to_string()))?;

        let bus = RedisPubSub::start(
            pool,
            SubscriberConfig::from(&config.redis),
            &[PubSubChannel::gateway_events()],
        )
        .await
        .map_err(|e| AppError::Unavailable(format!("Redis pub/sub: {e}")))?;
        tracing::info!("Redis connection established");

        Ok(Self {
            store: Arc::new(store),
            broker: Arc::new(broker),
            bus: Arc::new(bus),
            clock: Arc::new(SystemClock),
        })
    }
}

impl std::fmt::Debug for Infrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Infrastructure")
            .field("broker", &self.broker)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Gateway application state
///
/// Holds all shared dependencies for the gateway server.
#[derive(Clone)]
pub struct GatewayState {
    config: Arc<AppConfig>,
    infra: Infrastructure,
    jwt: Arc<JwtService>,
    lifecycle: ConnectionLifecycle,
    publisher: EventPublisher,
    connections: Arc<ConnectionManager>,
    broadcaster: Arc<ClusterBroadcaster>,
    started: Arc<AtomicBool>,
}

impl GatewayState {
    pub fn new(config: AppConfig, infra: Infrastructure) -> Self {
        let server_id = config.app.server_id.clone();
        let publisher = EventPublisher::new(infra.broker.clone());

        let registry = ConnectionRegistry::new(infra.store.clone(), infra.clock.clone(), &server_id);
        let presence = PresenceTracker::new(
            infra.store.clone(),
            infra.clock.clone(),
            config.presence.ttl(),
            &server_id,
        )
        .with_publisher(publisher.clone());

        let connections = ConnectionManager::new_shared();
        let broadcaster = Arc::new(ClusterBroadcaster::new(
            &server_id,
            infra.bus.clone(),
            connections.clone(),
        ));

        Self {
            jwt: Arc::new(JwtService::new(
                &config.jwt.secret,
                config.jwt.access_token_expiry,
            )),
            lifecycle: ConnectionLifecycle::new(registry, presence),
            publisher,
            connections,
            broadcaster,
            started: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
            infra,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn server_id(&self) -> &str {
        &self.config.app.server_id
    }

    pub fn infra(&self) -> &Infrastructure {
        &self.infra
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.lifecycle.registry()
    }

    pub fn presence(&self) -> &PresenceTracker {
        self.lifecycle.presence()
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.infra.clock
    }

    /// Process-local socket table
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn broadcaster(&self) -> &Arc<ClusterBroadcaster> {
        &self.broadcaster
    }

    /// Cross-instance emit primitive
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        self.broadcaster.clone()
    }

    /// Handler behind `message-delivery-queue`
    pub fn delivery_handler(&self) -> DeliveryHandler {
        DeliveryHandler::new(
            self.registry().clone(),
            self.presence().clone(),
            OfflineInbox::new(self.infra.store.clone()),
            self.emitter(),
        )
    }

    /// Handler behind `presence-events-queue`
    pub fn presence_event_handler(&self) -> PresenceEventHandler {
        PresenceEventHandler::new(self.emitter())
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Whether topology and consumers are up
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("server_id", &self.server_id())
            .field("connections", &self.connections)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub const TEST_SECRET: &str = "test-secret-with-enough-length-for-hs256";

    pub fn test_config(server_id: &str) -> AppConfig {
        let vars = [
            ("GATEWAY_PORT", "0"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("JWT_SECRET", TEST_SECRET),
            ("SERVER_ID", server_id),
        ];
        AppConfig::from_lookup(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        })
        .unwrap()
    }

    pub fn test_state() -> GatewayState {
        GatewayState::new(test_config("s1"), Infrastructure::in_memory())
    }
}
