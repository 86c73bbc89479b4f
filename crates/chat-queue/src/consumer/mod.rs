//! Generic at-least-once consumer.
//!
//! A `Consumer` owns a queue declaration, its bindings and a retry policy,
//! and drives any `MessageHandler` over deliveries from a `BrokerChannel`.
//! Failed messages are re-published with an incremented `x-retry-count`
//! until `max_retries` is reached, then rejected into the dead-letter queue.
//! While running, the consumer keeps a broker lease alive and returns
//! deliveries stranded by consumers whose lease lapsed.

mod config;

pub use config::{ConsumerConfig, ExchangeBinding, RetryConfig, DEFAULT_DEAD_LETTER_EXCHANGE};

use crate::broker::{BrokerChannel, Delivery, ExchangeKind, QueueOptions, DEFAULT_EXCHANGE};
use crate::error::{BrokerResult, ConsumerError, ProcessError};
use async_trait::async_trait;
use chat_cache::Backoff;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Per-delivery information handed to the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Attempts made before this one
    pub retry_count: u32,
    pub max_retries: u32,
    /// Broker-assigned message id
    pub message_id: String,
    pub routing_key: String,
}

impl MessageContext {
    /// Whether a failure now sends the message to the dead-letter queue
    #[must_use]
    pub fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Business logic plugged into a `Consumer`
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Decoded message body
    type Event: DeserializeOwned + Send;

    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn process(&self, event: Self::Event, ctx: &MessageContext) -> Result<(), ProcessError>;
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and removed
    Acked,
    /// Failed; a copy with this retry count was re-published
    Retried { next_retry: u32 },
    /// Failed for the last time and moved to the dead-letter queue
    DeadLettered,
    /// Failed and the retry copy could not be published; returned to the queue
    Requeued,
}

/// Identifier used in failure logs: `messageId`, then `tempMessageId`, then
/// `id`, then the broker's own id
fn log_message_id(delivery: &Delivery) -> String {
    serde_json::from_str::<serde_json::Value>(&delivery.payload)
        .ok()
        .and_then(|body| {
            ["messageId", "tempMessageId", "id"].iter().find_map(|field| {
                body.get(*field)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
            })
        })
        .unwrap_or_else(|| delivery.id.clone())
}

/// Queue consumer parameterised by its handler
pub struct Consumer<H: MessageHandler> {
    broker: Arc<dyn BrokerChannel>,
    handler: Arc<H>,
    config: ConsumerConfig,
}

impl<H: MessageHandler> std::fmt::Debug for Consumer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("handler", &self.handler.name())
            .field("queue", &self.config.queue)
            .finish_non_exhaustive()
    }
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new(broker: Arc<dyn BrokerChannel>, handler: H, config: ConsumerConfig) -> Self {
        Self {
            broker,
            handler: Arc::new(handler),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Declare the dead-letter topology, the queue and its bindings, then
    /// reclaim deliveries this consumer or a dead one left unsettled.
    pub async fn initialize(&self) -> Result<(), ConsumerError> {
        self.declare_topology()
            .await
            .map_err(|source| ConsumerError::Initialize {
                queue: self.config.queue.clone(),
                source,
            })
    }

    async fn declare_topology(&self) -> BrokerResult<()> {
        let queue = &self.config.queue;
        let retry = &self.config.retry;

        self.broker
            .declare_exchange(&retry.dead_letter_exchange, ExchangeKind::Topic)
            .await?;
        self.broker
            .declare_queue(&retry.dead_letter_queue, QueueOptions::durable())
            .await?;
        self.broker
            .bind_queue(&retry.dead_letter_queue, &retry.dead_letter_exchange, queue)
            .await?;

        self.broker
            .declare_queue(
                queue,
                QueueOptions::durable().dead_letter(&retry.dead_letter_exchange, queue.as_str()),
            )
            .await?;

        for binding in &self.config.bindings {
            self.broker
                .declare_exchange(&binding.exchange, ExchangeKind::Topic)
                .await?;
            self.broker
                .bind_queue(queue, &binding.exchange, &binding.routing_key)
                .await?;
        }

        self.broker.renew_lease(self.config.lease_ttl).await?;
        self.broker.recover(queue).await?;
        Ok(())
    }

    /// Renew the lease and sweep orphaned deliveries until `shutdown` flips
    async fn keep_lease(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.lease_renew_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.broker.renew_lease(self.config.lease_ttl).await {
                tracing::warn!(queue = %self.config.queue, error = %e, "Lease renewal failed");
                continue;
            }
            if let Err(e) = self.broker.reclaim_orphaned(&self.config.queue).await {
                tracing::warn!(queue = %self.config.queue, error = %e, "Orphan sweep failed");
            }
        }
    }

    /// Process one delivery and settle it
    pub async fn handle_delivery(&self, delivery: Delivery) -> BrokerResult<DeliveryOutcome> {
        let retry = &self.config.retry;
        let retry_count = delivery.properties.retry_count();
        let ctx = MessageContext {
            retry_count,
            max_retries: retry.max_retries,
            message_id: delivery.id.clone(),
            routing_key: delivery.routing_key.clone(),
        };

        let result = match serde_json::from_str::<H::Event>(&delivery.payload) {
            Ok(event) => self.handler.process(event, &ctx).await,
            Err(e) => Err(ProcessError::Parse(e)),
        };

        let err = match result {
            Ok(()) => {
                self.broker.ack(&delivery).await?;
                return Ok(DeliveryOutcome::Acked);
            }
            Err(err) => err,
        };

        let message_id = log_message_id(&delivery);
        tracing::error!(
            consumer = self.handler.name(),
            queue = %self.config.queue,
            message_id = %message_id,
            attempt = retry_count + 1,
            max_retries = retry.max_retries,
            error = %err,
            "Error processing message"
        );

        if retry_count < retry.max_retries {
            let next_retry = retry_count + 1;
            let properties = delivery
                .properties
                .clone()
                .with_retry_count(next_retry)
                .with_delay(retry.retry_delay);

            return match self
                .broker
                .publish(DEFAULT_EXCHANGE, &self.config.queue, &delivery.payload, properties)
                .await
            {
                Ok(_) => {
                    self.broker.ack(&delivery).await?;
                    Ok(DeliveryOutcome::Retried { next_retry })
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.config.queue,
                        message_id = %message_id,
                        error = %e,
                        "Retry publish failed, requeueing original"
                    );
                    self.broker.nack(&delivery, true).await?;
                    Ok(DeliveryOutcome::Requeued)
                }
            };
        }

        self.broker.nack(&delivery, false).await?;
        tracing::error!(
            consumer = self.handler.name(),
            queue = %self.config.queue,
            dead_letter_queue = %retry.dead_letter_queue,
            message_id = %message_id,
            attempts = retry_count + 1,
            reason = %err,
            payload = %delivery.payload,
            "Message sent to DLQ after {} retries",
            retry.max_retries
        );
        Ok(DeliveryOutcome::DeadLettered)
    }

    /// Initialize, then consume on a background task until `shutdown` flips
    pub async fn start(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ConsumerError> {
        self.initialize().await?;
        tracing::info!(
            consumer = self.handler.name(),
            queue = %self.config.queue,
            prefetch = self.config.prefetch,
            "Consumer started"
        );
        Ok(Arc::new(self).spawn(shutdown))
    }

    /// Consume on a background task; the queue must already be declared
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Receive loop with at most `prefetch` deliveries in flight
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.config.prefetch.max(1)));
        let mut in_flight = JoinSet::new();
        let lease = tokio::spawn(Arc::clone(&self).keep_lease(shutdown.clone()));
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));

        loop {
            if *shutdown.borrow() {
                break;
            }
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let received = tokio::select! {
                received = self.broker.receive(&self.config.queue, self.config.poll_timeout) => received,
                _ = shutdown.changed() => break,
            };

            match received {
                Ok(Some(delivery)) => {
                    backoff.reset();
                    let consumer = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let message_id = delivery.id.clone();
                        if let Err(e) = consumer.handle_delivery(delivery).await {
                            tracing::error!(
                                queue = %consumer.config.queue,
                                message_id = %message_id,
                                error = %e,
                                "Failed to settle delivery"
                            );
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        queue = %self.config.queue,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        // Let in-flight deliveries settle
        while in_flight.join_next().await.is_some() {}
        lease.abort();
        tracing::info!(
            consumer = self.handler.name(),
            queue = %self.config.queue,
            "Consumer stopped"
        );
    }
}
