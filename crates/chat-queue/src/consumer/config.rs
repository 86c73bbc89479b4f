//! Consumer configuration.

use chat_common::ConsumerSettings;
use std::time::Duration;

/// Exchange used for rejected messages of every queue
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "dlx.exchange";

/// An (exchange, routing key) pair a queue listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeBinding {
    pub exchange: String,
    pub routing_key: String,
}

impl ExchangeBinding {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Re-deliveries after the first attempt
    pub max_retries: u32,
    /// Hold-back before each re-delivery
    pub retry_delay: Duration,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
}

impl RetryConfig {
    /// Defaults for `queue`: 3 retries, 5s apart, then `{queue}.dlq`
    #[must_use]
    pub fn for_queue(queue: &str) -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_string(),
            dead_letter_queue: format!("{queue}.dlq"),
        }
    }
}

/// Everything a `Consumer` needs besides its handler
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    pub bindings: Vec<ExchangeBinding>,
    pub retry: RetryConfig,
    /// In-flight deliveries
    pub prefetch: usize,
    /// How long one receive call waits
    pub poll_timeout: Duration,
    /// Liveness lease; deliveries held by a consumer silent this long are reclaimed
    pub lease_ttl: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            retry: RetryConfig::for_queue(&queue),
            queue,
            bindings: Vec::new(),
            prefetch: 5,
            poll_timeout: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(30),
        }
    }

    /// Renew interval for the lease, a third of its TTL
    #[must_use]
    pub fn lease_renew_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(1))
    }

    #[must_use]
    pub fn bind(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.bindings.push(ExchangeBinding::new(exchange, routing_key));
        self
    }

    #[must_use]
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Apply prefetch and retry values loaded from the environment
    #[must_use]
    pub fn with_settings(self, settings: &ConsumerSettings) -> Self {
        self.prefetch(settings.prefetch)
            .max_retries(settings.max_retries)
            .retry_delay(settings.retry_delay())
            .lease_ttl(settings.lease_ttl())
    }
}
