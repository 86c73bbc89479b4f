//! # chat-queue
//!
//! Message broker layer.
//!
//! ## Features
//!
//! - **Broker port**: `BrokerChannel` with topic exchanges, durable queues and manual acks
//! - **Adapters**: `RedisBroker` shared by every process, `InMemoryBroker` for one process
//! - **Consumer**: `Consumer<H>` with bounded retry and dead-lettering
//!
//! ## Example
//!
//! ```ignore
//! let broker: Arc<dyn BrokerChannel> = Arc::new(RedisBroker::new(pool, server_id));
//! let config = ConsumerConfig::new("message-delivery-queue")
//!     .bind("chat.exchange", "message.sent");
//! let handle = Consumer::new(broker, handler, config).start(shutdown_rx).await?;
//! ```

pub mod broker;
pub mod consumer;
pub mod error;
pub mod publisher;

pub use broker::{
    topic_matches, BrokerChannel, Delivery, DeliveryTag, ExchangeKind, InMemoryBroker,
    MessageProperties, QueueOptions, RedisBroker, DEFAULT_EXCHANGE, DELAY_HEADER,
    RETRY_COUNT_HEADER,
};
pub use consumer::{
    Consumer, ConsumerConfig, DeliveryOutcome, ExchangeBinding, MessageContext, MessageHandler,
    RetryConfig, DEFAULT_DEAD_LETTER_EXCHANGE,
};
pub use error::{BrokerError, BrokerResult, ConsumerError, ProcessError};
pub use publisher::EventPublisher;
