//! Redis Pub/Sub publisher.

use crate::pool::{RedisPool, RedisResult};
use crate::pubsub::PubSubChannel;
use redis::AsyncCommands;
use serde::Serialize;

/// Redis Pub/Sub publisher
#[derive(Debug, Clone)]
pub struct Publisher {
    pool: RedisPool,
}

impl Publisher {
    /// Create a new publisher
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Serialize and publish a payload to a channel
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: &PubSubChannel,
        payload: &T,
    ) -> RedisResult<u32> {
        let payload = serde_json::to_string(payload)?;
        self.publish_raw(channel, &payload).await
    }

    /// Publish a raw message to a channel
    pub async fn publish_raw(&self, channel: &PubSubChannel, message: &str) -> RedisResult<u32> {
        let mut conn = self.pool.get().await?;
        let channel_name = channel.name();

        let receivers: u32 = conn.publish(&channel_name, message).await?;

        tracing::trace!(
            channel = %channel_name,
            receivers = receivers,
            "Published message"
        );

        Ok(receivers)
    }
}
