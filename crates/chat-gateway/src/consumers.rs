//! Broker consumers hosted by every gateway instance
//!
//! `message-delivery-queue` is shared: each message is handled by exactly one
//! instance, which emits across the cluster. `presence-events-queue` is
//! shared the same way; its handler broadcasts to every socket.

use std::sync::Arc;

use chat_common::{AppError, ConsumerSettings};
use chat_core::constants::{exchanges, queues, routing_keys};
use chat_queue::{
    BrokerChannel, BrokerResult, Consumer, ConsumerConfig, ConsumerError, ExchangeKind,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::server::GatewayState;

pub fn delivery_consumer_config(settings: &ConsumerSettings) -> ConsumerConfig {
    ConsumerConfig::new(queues::MESSAGE_DELIVERY)
        .bind(exchanges::CHAT, routing_keys::MESSAGE_SENT)
        .bind(exchanges::CHAT, routing_keys::MESSAGE_CONFIRMED)
        .bind(exchanges::CHAT, routing_keys::MESSAGE_CREATE_ERROR)
        .with_settings(settings)
}

pub fn presence_consumer_config(settings: &ConsumerSettings) -> ConsumerConfig {
    ConsumerConfig::new(queues::PRESENCE_EVENTS)
        .bind(exchanges::PRESENCE, routing_keys::PRESENCE_ALL)
        .with_settings(settings)
}

/// Declare the exchanges producers publish to
pub async fn declare_exchanges(broker: &Arc<dyn BrokerChannel>) -> BrokerResult<()> {
    for exchange in [exchanges::CHAT, exchanges::PRESENCE] {
        broker.declare_exchange(exchange, ExchangeKind::Topic).await?;
    }
    Ok(())
}

fn consumer_error(e: ConsumerError) -> AppError {
    AppError::Broker(e.to_string())
}

/// Declare topology and start both consumers
pub async fn start_consumers(
    state: &GatewayState,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, AppError> {
    let broker = state.infra().broker.clone();
    let settings = &state.config().consumer;
    declare_exchanges(&broker)
        .await
        .map_err(|e| AppError::Broker(format!("Failed to declare exchanges: {e}")))?;

    let delivery = Consumer::new(
        broker.clone(),
        state.delivery_handler(),
        delivery_consumer_config(settings),
    )
    .start(shutdown.clone())
    .await
    .map_err(consumer_error)?;

    let presence = Consumer::new(
        broker,
        state.presence_event_handler(),
        presence_consumer_config(settings),
    )
    .start(shutdown.clone())
    .await
    .map_err(consumer_error)?;

    Ok(vec![delivery, presence])
}
