//! Pub/sub bus abstraction shared by every gateway instance.

use crate::pool::{RedisPool, RedisResult};
use crate::pubsub::{
    PubSubChannel, Publisher, ReceivedMessage, Subscriber, SubscriberBuilder, SubscriberConfig,
    SubscriberResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Fire-and-forget channel bus with fan-out to every subscriber
#[async_trait]
pub trait PubSubBus: Send + Sync + std::fmt::Debug {
    /// Publish a raw payload, returning the number of receivers reached
    async fn publish(&self, channel: &PubSubChannel, payload: String) -> RedisResult<u32>;

    /// Stream of every message received on the subscribed channels
    fn receiver(&self) -> broadcast::Receiver<ReceivedMessage>;

    /// Stop receiving
    async fn shutdown(&self) {}
}

/// Redis-backed bus: pooled publisher plus a dedicated subscriber connection
#[derive(Debug, Clone)]
pub struct RedisPubSub {
    publisher: Publisher,
    subscriber: Arc<Subscriber>,
}

impl RedisPubSub {
    /// Start the subscriber and subscribe to `channels`
    pub async fn start(
        pool: RedisPool,
        config: SubscriberConfig,
        channels: &[PubSubChannel],
    ) -> SubscriberResult<Self> {
        let mut builder = SubscriberBuilder::new()
            .redis_url(config.redis_url)
            .broadcast_buffer(config.broadcast_buffer)
            .reconnect_max_delay(config.reconnect_max_delay)
            .connect_timeout(config.connect_timeout);
        for channel in channels {
            builder = builder.subscribe(channel.clone());
        }
        let subscriber = builder.build().await?;

        Ok(Self {
            publisher: Publisher::new(pool),
            subscriber: Arc::new(subscriber),
        })
    }

    #[must_use]
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }
}

#[async_trait]
impl PubSubBus for RedisPubSub {
    async fn publish(&self, channel: &PubSubChannel, payload: String) -> RedisResult<u32> {
        self.publisher.publish_raw(channel, &payload).await
    }

    fn receiver(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.subscriber.receiver()
    }

    async fn shutdown(&self) {
        if let Err(e) = self.subscriber.shutdown().await {
            tracing::debug!(error = %e, "Subscriber already stopped");
        }
    }
}

/// Process-local bus; clones share one channel, so several gateway
/// instances in the same process see each other's messages.
#[derive(Debug, Clone)]
pub struct InMemoryPubSub {
    tx: broadcast::Sender<ReceivedMessage>,
}

impl InMemoryPubSub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl PubSubBus for InMemoryPubSub {
    async fn publish(&self, channel: &PubSubChannel, payload: String) -> RedisResult<u32> {
        let receivers = self
            .tx
            .send(ReceivedMessage::new(channel.clone(), payload))
            .unwrap_or(0);
        Ok(receivers as u32)
    }

    fn receiver(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.tx.subscribe()
    }
}
