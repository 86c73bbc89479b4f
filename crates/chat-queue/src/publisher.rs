//! JSON event publishing over a `BrokerChannel`.

use crate::broker::{BrokerChannel, MessageProperties};
use crate::error::BrokerResult;
use serde::Serialize;
use std::sync::Arc;

/// Serializes events and publishes them to an exchange
#[derive(Debug, Clone)]
pub struct EventPublisher {
    broker: Arc<dyn BrokerChannel>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn BrokerChannel>) -> Self {
        Self { broker }
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<dyn BrokerChannel> {
        &self.broker
    }

    /// Publish `event` as JSON; returns the number of queues reached
    pub async fn publish<T: Serialize + ?Sized + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        event: &T,
        message_id: Option<&str>,
    ) -> BrokerResult<usize> {
        let payload = serde_json::to_string(event)?;
        let mut properties = MessageProperties::default();
        if let Some(id) = message_id {
            properties = properties.with_message_id(id);
        }

        let routed = self
            .broker
            .publish(exchange, routing_key, &payload, properties)
            .await?;

        tracing::debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            routed,
            "Event published"
        );
        Ok(routed)
    }
}
