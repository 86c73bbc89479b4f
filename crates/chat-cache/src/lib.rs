//! # chat-cache
//!
//! Redis adapters for the shared state store and cross-instance pub/sub.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **State Store**: `StateStore` over Redis (atomic pipelines) and in memory
//! - **Pub/Sub**: Gateway event distribution across server instances
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::{RedisPool, RedisPoolConfig, RedisStateStore, RedisPubSub, PubSubChannel};
//!
//! let pool = RedisPool::connect(RedisPoolConfig::default()).await?;
//! let store = RedisStateStore::new(pool.clone());
//!
//! let bus = RedisPubSub::start(pool, SubscriberConfig::default(), &[PubSubChannel::gateway_events()]).await?;
//! bus.publish(&PubSubChannel::gateway_events(), payload).await?;
//! ```

pub mod backoff;
pub mod pool;
pub mod pubsub;
pub mod store;

pub use backoff::Backoff;

// Re-export pool types
pub use pool::{
    create_shared_pool, RedisPool, RedisPoolConfig, RedisPoolError, RedisResult, SharedRedisPool,
};

// Re-export store types
pub use store::{InMemoryStateStore, RedisStateStore};

// Re-export pubsub types
pub use pubsub::{
    InMemoryPubSub, PubSubBus, PubSubChannel, Publisher, ReceivedMessage, RedisPubSub, Subscriber,
    SubscriberBuilder, SubscriberConfig, SubscriberError, SubscriberResult, GATEWAY_EVENTS_CHANNEL,
};
