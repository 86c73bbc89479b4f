//! Redis-backed broker.
//!
//! Layout:
//! - `broker:exchanges` hash of exchange name to kind
//! - `broker:queues` hash of queue name to declaration options
//! - `broker:bindings:{exchange}` set of bindings
//! - `broker:queue:{queue}` ready list, producers push left, consumers move from the right
//! - `broker:queue:{queue}:unacked:{consumer}` deliveries held by one consumer
//! - `broker:queue:{queue}:delayed` sorted set scored by due time in ms
//! - `broker:queue:{queue}:holders` set of consumers that may hold unacked deliveries
//! - `broker:consumer:{consumer}:lease` present while the consumer is alive

use super::{
    routes_to, BrokerChannel, Delivery, DeliveryTag, ExchangeKind, MessageProperties,
    QueueOptions, StoredMessage, DEFAULT_EXCHANGE,
};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use chat_cache::RedisPool;
use deadpool_redis::Connection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

mod keys {
    pub const EXCHANGES: &str = "broker:exchanges";
    pub const QUEUES: &str = "broker:queues";

    pub fn bindings(exchange: &str) -> String {
        format!("broker:bindings:{exchange}")
    }

    pub fn ready(queue: &str) -> String {
        format!("broker:queue:{queue}")
    }

    pub fn unacked(queue: &str, consumer: &str) -> String {
        format!("broker:queue:{queue}:unacked:{consumer}")
    }

    pub fn delayed(queue: &str) -> String {
        format!("broker:queue:{queue}:delayed")
    }

    pub fn holders(queue: &str) -> String {
        format!("broker:queue:{queue}:holders")
    }

    pub fn lease(consumer: &str) -> String {
        format!("broker:consumer:{consumer}:lease")
    }
}

/// Moves due delayed messages onto the ready list in one step
const PROMOTE_DUE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
    redis.call('LPUSH', KEYS[2], member)
end
return #due
";

/// Returns a lapsed holder's unacked deliveries to the head of the ready list.
/// Does nothing while the holder's lease key exists.
const RECLAIM_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local moved = 0
while redis.call('LMOVE', KEYS[2], KEYS[3], 'RIGHT', 'RIGHT') do
    moved = moved + 1
end
redis.call('SREM', KEYS[4], ARGV[1])
return moved
";

/// Smallest BLMOVE timeout; zero would block forever
const MIN_BLOCK_SECS: f64 = 0.01;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingRecord {
    queue: String,
    routing_key: String,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `BrokerChannel` over Redis lists.
///
/// Every process passes its own `consumer_id` (the server id), which names
/// its unacked lists. While the process renews its lease those lists are
/// left alone; once the lease lapses any other consumer moves them back to
/// the ready list.
#[derive(Clone)]
pub struct RedisBroker {
    pool: RedisPool,
    consumer_id: String,
    promote_script: Arc<redis::Script>,
    reclaim_script: Arc<redis::Script>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("consumer_id", &self.consumer_id)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    #[must_use]
    pub fn new(pool: RedisPool, consumer_id: impl Into<String>) -> Self {
        Self {
            pool,
            consumer_id: consumer_id.into(),
            promote_script: Arc::new(redis::Script::new(PROMOTE_DUE_SCRIPT)),
            reclaim_script: Arc::new(redis::Script::new(RECLAIM_SCRIPT)),
        }
    }

    #[must_use]
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    async fn conn(&self) -> BrokerResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn queue_options(&self, conn: &mut Connection, queue: &str) -> BrokerResult<QueueOptions> {
        let raw: Option<String> = conn.hget(keys::QUEUES, queue).await?;
        let raw = raw.ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn route(
        &self,
        conn: &mut Connection,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<Vec<String>> {
        if exchange == DEFAULT_EXCHANGE {
            let exists: bool = conn.hexists(keys::QUEUES, routing_key).await?;
            return Ok(if exists {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let kind: Option<String> = conn.hget(keys::EXCHANGES, exchange).await?;
        let kind = kind
            .as_deref()
            .and_then(ExchangeKind::parse)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let members: Vec<String> = conn.smembers(keys::bindings(exchange)).await?;
        let mut queues: Vec<String> = members
            .iter()
            .filter_map(|m| serde_json::from_str::<BindingRecord>(m).ok())
            .filter(|b| routes_to(kind, &b.routing_key, routing_key))
            .map(|b| b.queue)
            .collect();
        queues.sort();
        queues.dedup();
        Ok(queues)
    }

    async fn route_and_push(&self, conn: &mut Connection, message: &StoredMessage) -> BrokerResult<usize> {
        let targets = self
            .route(conn, &message.exchange, &message.routing_key)
            .await?;
        if targets.is_empty() {
            tracing::debug!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "Message unroutable, dropped"
            );
            return Ok(0);
        }

        let raw = serde_json::to_string(message)?;
        let due = message
            .properties
            .delay()
            .map(|delay| now_millis() + delay.as_millis() as i64);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for queue in &targets {
            match due {
                Some(due) => {
                    pipe.zadd(keys::delayed(queue), &raw, due).ignore();
                }
                None => {
                    pipe.lpush(keys::ready(queue), &raw).ignore();
                }
            }
        }
        pipe.query_async::<()>(conn).await?;

        Ok(targets.len())
    }

    /// Block no longer than the next delayed message needs
    async fn block_for(&self, conn: &mut Connection, queue: &str, timeout: Duration) -> BrokerResult<f64> {
        let next: Vec<(String, f64)> = conn.zrange_withscores(keys::delayed(queue), 0, 0).await?;
        let wait = match next.first() {
            Some((_, due)) => {
                let remaining = (*due as i64 - now_millis()).max(0) as u64;
                Duration::from_millis(remaining).min(timeout)
            }
            None => timeout,
        };
        Ok(wait.as_secs_f64().max(MIN_BLOCK_SECS))
    }

    /// Remove a delivery from this consumer's unacked list
    async fn settle(&self, conn: &mut Connection, delivery: &Delivery) -> BrokerResult<()> {
        let removed: i64 = conn
            .lrem(
                keys::unacked(&delivery.queue, &self.consumer_id),
                1,
                delivery.tag.as_str(),
            )
            .await?;
        if removed == 0 {
            return Err(BrokerError::PreconditionFailed(format!(
                "unknown delivery {}",
                delivery.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for RedisBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let created: bool = conn.hset_nx(keys::EXCHANGES, name, kind.as_str()).await?;
        if created {
            tracing::debug!(exchange = %name, kind = kind.as_str(), "Exchange declared");
            return Ok(());
        }

        let existing: Option<String> = conn.hget(keys::EXCHANGES, name).await?;
        match existing.as_deref() {
            Some(existing) if existing != kind.as_str() => Err(BrokerError::PreconditionFailed(
                format!("exchange {name} already declared as {existing}"),
            )),
            _ => Ok(()),
        }
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(&options)?;
        let _: () = conn.hset(keys::QUEUES, name, raw).await?;
        tracing::debug!(queue = %name, "Queue declared");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        let mut conn = self.conn().await?;

        let queue_exists: bool = conn.hexists(keys::QUEUES, queue).await?;
        if !queue_exists {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        let exchange_exists: bool = conn.hexists(keys::EXCHANGES, exchange).await?;
        if !exchange_exists {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }

        let record = serde_json::to_string(&BindingRecord {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        })?;
        let _: () = conn.sadd(keys::bindings(exchange), record).await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
        properties: MessageProperties,
    ) -> BrokerResult<usize> {
        let mut conn = self.conn().await?;
        let message = StoredMessage::new(exchange, routing_key, payload, properties);
        self.route_and_push(&mut conn, &message).await
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> BrokerResult<Option<Delivery>> {
        let mut conn = self.conn().await?;

        let exists: bool = conn.hexists(keys::QUEUES, queue).await?;
        if !exists {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }

        let promoted: usize = self
            .promote_script
            .key(keys::delayed(queue))
            .key(keys::ready(queue))
            .arg(now_millis())
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            tracing::trace!(queue = %queue, promoted, "Delayed messages due");
        }

        let block = self.block_for(&mut conn, queue, timeout).await?;
        let _: () = conn.sadd(keys::holders(queue), &self.consumer_id).await?;
        let unacked = keys::unacked(queue, &self.consumer_id);
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(keys::ready(queue))
            .arg(&unacked)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(block)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredMessage>(&raw) {
            Ok(message) => Ok(Some(message.into_delivery(queue, DeliveryTag::new(raw)))),
            Err(e) => {
                let _: i64 = conn.lrem(&unacked, 1, &raw).await?;
                Err(BrokerError::Corrupt {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        self.settle(&mut conn, delivery).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        self.settle(&mut conn, delivery).await?;

        let mut message: StoredMessage = serde_json::from_str(delivery.tag.as_str())?;

        if requeue {
            message.redelivered = true;
            let raw = serde_json::to_string(&message)?;
            // Right end is the head of the queue
            let _: () = conn.rpush(keys::ready(&delivery.queue), raw).await?;
            return Ok(());
        }

        let options = self.queue_options(&mut conn, &delivery.queue).await?;
        if let Some(dlx) = options.dead_letter_exchange {
            let routing_key = options
                .dead_letter_routing_key
                .unwrap_or_else(|| message.routing_key.clone());
            let dead = message.dead_lettered(&dlx, &routing_key, &delivery.queue);
            self.route_and_push(&mut conn, &dead).await?;
        }
        Ok(())
    }

    async fn renew_lease(&self, ttl: Duration) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::cmd("SET")
            .arg(keys::lease(&self.consumer_id))
            .arg(now_millis())
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn reclaim_orphaned(&self, queue: &str) -> BrokerResult<usize> {
        let mut conn = self.conn().await?;
        let holders: Vec<String> = conn.smembers(keys::holders(queue)).await?;

        let mut reclaimed = 0;
        for holder in holders.iter().filter(|h| **h != self.consumer_id) {
            let moved: usize = self
                .reclaim_script
                .key(keys::lease(holder))
                .key(keys::unacked(queue, holder))
                .key(keys::ready(queue))
                .key(keys::holders(queue))
                .arg(holder)
                .invoke_async(&mut conn)
                .await?;
            if moved > 0 {
                tracing::warn!(
                    queue = %queue,
                    holder = %holder,
                    reclaimed = moved,
                    "Reclaimed deliveries from consumer with lapsed lease"
                );
            }
            reclaimed += moved;
        }
        Ok(reclaimed)
    }

    async fn recover(&self, queue: &str) -> BrokerResult<usize> {
        let orphaned = self.reclaim_orphaned(queue).await?;

        let mut conn = self.conn().await?;
        let unacked = keys::unacked(queue, &self.consumer_id);
        let ready = keys::ready(queue);

        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&unacked)
                .arg(&ready)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(
                queue = %queue,
                consumer = %self.consumer_id,
                recovered,
                "Recovered unacknowledged messages"
            );
        }
        Ok(recovered + orphaned)
    }

    async fn ping(&self) -> BrokerResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
