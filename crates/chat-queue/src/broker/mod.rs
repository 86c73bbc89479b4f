//! Broker port and its adapters.
//!
//! The model is the AMQP one: named exchanges route published messages to
//! bound queues by routing key, consumers receive with manual
//! acknowledgement, and rejected messages move to the queue's dead-letter
//! exchange.

mod memory;
mod redis_broker;
mod topic;

pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;
pub use topic::{routes_to, topic_matches};

use crate::error::BrokerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// The nameless exchange; routes straight to the queue named by the routing key
pub const DEFAULT_EXCHANGE: &str = "";

/// Header carrying the number of previous delivery attempts
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header carrying the re-delivery delay in milliseconds
pub const DELAY_HEADER: &str = "x-delay";

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Exact routing-key match
    Direct,
    /// Dot-separated words with `*` and `#` wildcards
    Topic,
}

impl ExchangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "topic" => Some(Self::Topic),
            _ => None,
        }
    }
}

/// Queue declaration arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOptions {
    pub durable: bool,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
}

impl QueueOptions {
    #[must_use]
    pub fn durable() -> Self {
        Self {
            durable: true,
            ..Self::default()
        }
    }

    /// Route rejected messages to `exchange` with `routing_key`
    #[must_use]
    pub fn dead_letter(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

/// Per-message attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProperties {
    pub message_id: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
}

impl MessageProperties {
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Previous delivery attempts, 0 when absent or malformed
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(RETRY_COUNT_HEADER)
            .and_then(Value::as_u64)
            .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
    }

    #[must_use]
    pub fn with_retry_count(self, count: u32) -> Self {
        self.with_header(RETRY_COUNT_HEADER, count)
    }

    /// Hold-back requested through `x-delay`
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.headers
            .get(DELAY_HEADER)
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_header(DELAY_HEADER, delay.as_millis() as u64)
    }
}

/// Opaque handle used to settle a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTag(String);

impl DeliveryTag {
    pub(crate) fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message handed to a consumer, pending ack or nack
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Broker-assigned message id
    pub id: String,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
    pub properties: MessageProperties,
    pub redelivered: bool,
}

/// Message as held inside a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredMessage {
    pub id: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
    pub properties: MessageProperties,
    #[serde(default)]
    pub redelivered: bool,
}

impl StoredMessage {
    pub fn new(exchange: &str, routing_key: &str, payload: &str, properties: MessageProperties) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_string(),
            properties,
            redelivered: false,
        }
    }

    pub fn into_delivery(self, queue: &str, tag: DeliveryTag) -> Delivery {
        Delivery {
            tag,
            id: self.id,
            queue: queue.to_string(),
            exchange: self.exchange,
            routing_key: self.routing_key,
            payload: self.payload,
            properties: self.properties,
            redelivered: self.redelivered,
        }
    }

    /// Copy routed to a dead-letter exchange
    pub fn dead_lettered(&self, exchange: &str, routing_key: &str, queue: &str) -> Self {
        let mut properties = self.properties.clone();
        properties
            .headers
            .insert("x-first-death-queue".to_string(), Value::from(queue));
        properties
            .headers
            .insert("x-first-death-reason".to_string(), Value::from("rejected"));
        Self {
            id: self.id.clone(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: self.payload.clone(),
            properties,
            redelivered: false,
        }
    }
}

/// Topic broker port
#[async_trait]
pub trait BrokerChannel: Send + Sync + std::fmt::Debug {
    /// Idempotently declare an exchange; redeclaring with another kind fails
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<()>;

    /// Idempotently declare a queue
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<()>;

    /// Bind a queue to an exchange with a routing pattern
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()>;

    /// Route a message; returns how many queues received it
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
        properties: MessageProperties,
    ) -> BrokerResult<usize>;

    /// Wait up to `timeout` for the next ready message
    async fn receive(&self, queue: &str, timeout: Duration) -> BrokerResult<Option<Delivery>>;

    /// Remove a delivery permanently
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Reject a delivery; without requeue it is dead-lettered when configured
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BrokerResult<()>;

    /// Mark this consumer alive for `ttl`; deliveries held by a consumer
    /// whose lease lapsed may be reclaimed by any other consumer
    async fn renew_lease(&self, ttl: Duration) -> BrokerResult<()>;

    /// Return deliveries held by consumers whose lease lapsed to the queue
    async fn reclaim_orphaned(&self, queue: &str) -> BrokerResult<usize>;

    /// Return deliveries this consumer never settled to the queue, together
    /// with any orphaned ones
    async fn recover(&self, queue: &str) -> BrokerResult<usize>;

    /// Liveness probe
    async fn ping(&self) -> BrokerResult<()>;
}
