//! Redis Pub/Sub subscriber.
//!
//! Holds a dedicated pub/sub connection, re-subscribes after reconnects and
//! fans received messages out over a tokio broadcast channel.

use crate::backoff::Backoff;
use crate::pool::redact_url;
use crate::pubsub::PubSubChannel;
use futures_util::StreamExt;
use redis::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Error type for subscriber operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;

/// Received message from Pub/Sub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Channel the message was received on
    pub channel: PubSubChannel,
    /// Raw payload
    pub payload: String,
}

impl ReceivedMessage {
    #[must_use]
    pub fn new(channel: PubSubChannel, payload: impl Into<String>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Create from raw Redis message
    fn from_redis(channel_name: &str, payload: String) -> Self {
        Self {
            channel: PubSubChannel::parse(channel_name),
            payload,
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Channel buffer size for broadcast
    pub broadcast_buffer: usize,
    /// First reconnect delay
    pub reconnect_base_delay: Duration,
    /// Cap of the exponential reconnect backoff
    pub reconnect_max_delay: Duration,
    /// Bound on each connection attempt
    pub connect_timeout: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            broadcast_buffer: 1024,
            reconnect_base_delay: Duration::from_millis(50),
            reconnect_max_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&chat_common::RedisConfig> for SubscriberConfig {
    fn from(config: &chat_common::RedisConfig) -> Self {
        Self {
            redis_url: config.url.clone(),
            reconnect_max_delay: config.reconnect_max_delay(),
            connect_timeout: config.connect_timeout(),
            ..Self::default()
        }
    }
}

/// Redis Pub/Sub subscriber
pub struct Subscriber {
    /// Currently subscribed channels
    subscribed: Arc<RwLock<HashSet<String>>>,
    /// Broadcast sender for messages
    broadcast_tx: broadcast::Sender<ReceivedMessage>,
    /// Control channel for subscription management
    control_tx: mpsc::Sender<SubscriberCommand>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("receivers", &self.broadcast_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Commands for subscription management
#[derive(Debug)]
enum SubscriberCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

enum ListenerExit {
    Shutdown,
    StreamEnded,
}

impl Subscriber {
    /// Create a new subscriber and start the background listener
    pub fn new(config: SubscriberConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_buffer);
        let (control_tx, control_rx) = mpsc::channel(32);
        let subscribed = Arc::new(RwLock::new(HashSet::new()));

        let subscriber = Self {
            subscribed: subscribed.clone(),
            broadcast_tx: broadcast_tx.clone(),
            control_tx,
        };

        // Start background listener
        tokio::spawn(Self::listener_loop(
            config,
            subscribed,
            broadcast_tx,
            control_rx,
        ));

        subscriber
    }

    /// Background listener loop
    async fn listener_loop(
        config: SubscriberConfig,
        subscribed: Arc<RwLock<HashSet<String>>>,
        broadcast_tx: broadcast::Sender<ReceivedMessage>,
        mut control_rx: mpsc::Receiver<SubscriberCommand>,
    ) {
        let mut backoff = Backoff::new(config.reconnect_base_delay, config.reconnect_max_delay);

        loop {
            let result = Self::run_listener(
                &config,
                &subscribed,
                &broadcast_tx,
                &mut control_rx,
                &mut backoff,
            )
            .await;

            let delay = match result {
                Ok(ListenerExit::Shutdown) => {
                    tracing::info!("Subscriber shutting down");
                    break;
                }
                Ok(ListenerExit::StreamEnded) => backoff.next_delay(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Subscriber error, reconnecting"
                    );
                    delay
                }
            };

            // Shutdown must still be honoured while waiting to reconnect
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                cmd = control_rx.recv() => match cmd {
                    Some(SubscriberCommand::Shutdown) | None => {
                        tracing::info!("Subscriber shutting down");
                        break;
                    }
                    Some(SubscriberCommand::Subscribe(channels)) => {
                        subscribed.write().await.extend(channels);
                    }
                    Some(SubscriberCommand::Unsubscribe(channels)) => {
                        let mut set = subscribed.write().await;
                        for channel in &channels {
                            set.remove(channel);
                        }
                    }
                },
            }
        }
    }

    /// Run the listener until error or shutdown
    async fn run_listener(
        config: &SubscriberConfig,
        subscribed: &Arc<RwLock<HashSet<String>>>,
        broadcast_tx: &broadcast::Sender<ReceivedMessage>,
        control_rx: &mut mpsc::Receiver<SubscriberCommand>,
        backoff: &mut Backoff,
    ) -> SubscriberResult<ListenerExit> {
        let client = Client::open(config.redis_url.as_str())?;
        let mut pubsub = tokio::time::timeout(config.connect_timeout, client.get_async_pubsub())
            .await
            .map_err(|_| SubscriberError::Connection("connect timed out".to_string()))??;

        // Subscribe to existing channels
        {
            let channels = subscribed.read().await;
            for channel in channels.iter() {
                pubsub.subscribe(channel).await?;
            }
        }

        backoff.reset();
        tracing::info!(url = %redact_url(&config.redis_url), "Subscriber connected to Redis");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                // Handle incoming messages
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let channel_name = msg.get_channel_name().to_string();
                            let payload: String = msg.get_payload().unwrap_or_default();

                            // No receivers is not an error
                            let _ = broadcast_tx.send(ReceivedMessage::from_redis(&channel_name, payload));

                            tracing::trace!(channel = %channel_name, "Received Pub/Sub message");
                        }
                        None => {
                            tracing::warn!("Pub/Sub stream ended");
                            return Ok(ListenerExit::StreamEnded);
                        }
                    }
                }

                // Handle control commands
                cmd = control_rx.recv() => {
                    match cmd {
                        Some(SubscriberCommand::Subscribe(channels)) => {
                            // Need to drop stream to access pubsub
                            drop(stream);
                            for channel in &channels {
                                if let Err(e) = pubsub.subscribe(channel).await {
                                    tracing::error!(channel = %channel, error = %e, "Failed to subscribe");
                                } else {
                                    subscribed.write().await.insert(channel.clone());
                                    tracing::debug!(channel = %channel, "Subscribed to channel");
                                }
                            }
                            stream = pubsub.on_message();
                        }
                        Some(SubscriberCommand::Unsubscribe(channels)) => {
                            drop(stream);
                            for channel in &channels {
                                if let Err(e) = pubsub.unsubscribe(channel).await {
                                    tracing::error!(channel = %channel, error = %e, "Failed to unsubscribe");
                                } else {
                                    subscribed.write().await.remove(channel);
                                    tracing::debug!(channel = %channel, "Unsubscribed from channel");
                                }
                            }
                            stream = pubsub.on_message();
                        }
                        Some(SubscriberCommand::Shutdown) | None => {
                            return Ok(ListenerExit::Shutdown);
                        }
                    }
                }
            }
        }
    }

    /// Subscribe to channels
    pub async fn subscribe(&self, channels: &[PubSubChannel]) -> SubscriberResult<()> {
        let channel_names: Vec<String> = channels.iter().map(PubSubChannel::name).collect();

        self.control_tx
            .send(SubscriberCommand::Subscribe(channel_names))
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }

    /// Unsubscribe from channels
    pub async fn unsubscribe(&self, channels: &[PubSubChannel]) -> SubscriberResult<()> {
        let channel_names: Vec<String> = channels.iter().map(PubSubChannel::name).collect();

        self.control_tx
            .send(SubscriberCommand::Unsubscribe(channel_names))
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }

    /// Get a receiver for broadcast messages
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Get currently subscribed channels
    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.subscribed.read().await.iter().cloned().collect()
    }

    /// Shutdown the subscriber
    pub async fn shutdown(&self) -> SubscriberResult<()> {
        self.control_tx
            .send(SubscriberCommand::Shutdown)
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }
}

/// Builder for subscriber
pub struct SubscriberBuilder {
    config: SubscriberConfig,
    initial_channels: Vec<PubSubChannel>,
}

impl SubscriberBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SubscriberConfig::default(),
            initial_channels: Vec::new(),
        }
    }

    /// Set Redis URL
    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    /// Set broadcast buffer size
    #[must_use]
    pub fn broadcast_buffer(mut self, size: usize) -> Self {
        self.config.broadcast_buffer = size;
        self
    }

    /// Set the reconnect backoff cap
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_max_delay = delay;
        self
    }

    /// Set the per-attempt connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Add initial channel subscription
    #[must_use]
    pub fn subscribe(mut self, channel: PubSubChannel) -> Self {
        self.initial_channels.push(channel);
        self
    }

    /// Build and start the subscriber
    pub async fn build(self) -> SubscriberResult<Subscriber> {
        let subscriber = Subscriber::new(self.config);

        if !self.initial_channels.is_empty() {
            subscriber.subscribe(&self.initial_channels).await?;
        }

        Ok(subscriber)
    }
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_message_parsing() {
        let payload = r#"{"origin":"s1"}"#.to_string();
        let msg = ReceivedMessage::from_redis("gateway:events", payload.clone());

        assert_eq!(msg.channel, PubSubChannel::GatewayEvents);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn test_subscriber_config_default() {
        let config = SubscriberConfig::default();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.broadcast_buffer, 1024);
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_subscriber_builder() {
        let builder = SubscriberBuilder::new()
            .redis_url("redis://localhost:6380")
            .broadcast_buffer(2048)
            .reconnect_max_delay(Duration::from_millis(500))
            .subscribe(PubSubChannel::gateway_events());

        assert_eq!(builder.config.redis_url, "redis://localhost:6380");
        assert_eq!(builder.config.broadcast_buffer, 2048);
        assert_eq!(builder.config.reconnect_max_delay, Duration::from_millis(500));
        assert_eq!(builder.initial_channels.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_reconnecting() {
        let subscriber = SubscriberBuilder::new()
            .redis_url("redis://127.0.0.1:1")
            .connect_timeout(Duration::from_millis(200))
            .subscribe(PubSubChannel::gateway_events())
            .build()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        subscriber.shutdown().await.unwrap();

        // Listener exits and drops the control receiver
        tokio::time::timeout(Duration::from_secs(2), async {
            while subscriber.subscribe(&[PubSubChannel::custom("x")]).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }
}
