//! Single-process broker.

use super::{
    routes_to, BrokerChannel, Delivery, DeliveryTag, ExchangeKind, MessageProperties,
    QueueOptions, StoredMessage, DEFAULT_EXCHANGE,
};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    options: QueueOptions,
    ready: VecDeque<StoredMessage>,
    /// Delivery tag to holding consumer and message
    unacked: HashMap<String, (String, StoredMessage)>,
    delayed: Vec<(Instant, StoredMessage)>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        self.ready.extend(due.into_iter().map(|(_, msg)| msg));
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    /// Move every unacked delivery whose holder matches `reclaim` back to the head
    fn requeue_held(&mut self, reclaim: impl Fn(&str) -> bool) -> usize {
        let tags: Vec<String> = self
            .unacked
            .iter()
            .filter(|(_, (holder, _))| reclaim(holder.as_str()))
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in &tags {
            if let Some((_, mut message)) = self.unacked.remove(tag) {
                message.redelivered = true;
                self.ready.push_front(message);
            }
        }
        tags.len()
    }
}

#[derive(Debug)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    /// Consumer id to lease expiry
    leases: HashMap<String, Instant>,
    next_tag: u64,
}

impl State {
    fn route(&self, exchange: &str, routing_key: &str) -> BrokerResult<Vec<String>> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let kind = *self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        let mut queues: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && routes_to(kind, &b.routing_key, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        Ok(queues)
    }

    fn enqueue(&mut self, queue: &str, message: StoredMessage, now: Instant) {
        if let Some(q) = self.queues.get_mut(queue) {
            match message.properties.delay() {
                Some(delay) => q.delayed.push((now + delay, message)),
                None => q.ready.push_back(message),
            }
        }
    }

    fn publish(&mut self, message: &StoredMessage, now: Instant) -> BrokerResult<usize> {
        let targets = self.route(&message.exchange, &message.routing_key)?;
        for queue in &targets {
            self.enqueue(queue, message.clone(), now);
        }
        Ok(targets.len())
    }

    fn lease_live(&self, consumer: &str, now: Instant) -> bool {
        self.leases.get(consumer).is_some_and(|expiry| *expiry > now)
    }

    /// Requeue deliveries of `queue` held by consumers other than `me`
    /// without a live lease, plus `me`'s own when `own` is set
    fn reclaim(&mut self, queue: &str, me: &str, own: bool, now: Instant) -> BrokerResult<usize> {
        let holders: Vec<String> = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?
            .unacked
            .values()
            .map(|(holder, _)| holder.clone())
            .collect();
        let orphaned: Vec<String> = holders
            .into_iter()
            .filter(|holder| holder != me && !self.lease_live(holder, now))
            .collect();

        let Some(q) = self.queues.get_mut(queue) else {
            return Ok(0);
        };
        Ok(q.requeue_held(|holder| (own && holder == me) || orphaned.iter().any(|o| o == holder)))
    }
}

/// Consumer id used when none is given
const DEFAULT_CONSUMER_ID: &str = "local";

/// Broker held entirely in process memory.
///
/// Clones share state. Honours `x-delay`, dead-letter routing and consumer
/// leases the same way `RedisBroker` does, so consumers can be exercised
/// without Redis.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    consumer_id: String,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            notify: Arc::default(),
            consumer_id: DEFAULT_CONSUMER_ID.to_string(),
        }
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the same broker that receives as another consumer
    #[must_use]
    pub fn as_consumer(&self, consumer_id: impl Into<String>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            notify: Arc::clone(&self.notify),
            consumer_id: consumer_id.into(),
        }
    }

    #[must_use]
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Ready plus delayed messages in a queue
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len() + q.delayed.len())
    }

    /// Delivered but not yet settled
    #[must_use]
    pub fn unacked_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    /// Payloads waiting in a queue, ready first
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<String> {
        let state = self.state.lock();
        state.queues.get(queue).map_or_else(Vec::new, |q| {
            q.ready
                .iter()
                .map(|m| m.payload.clone())
                .chain(q.delayed.iter().map(|(_, m)| m.payload.clone()))
                .collect()
        })
    }

    fn settle(&self, delivery: &Delivery) -> BrokerResult<StoredMessage> {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| BrokerError::QueueNotFound(delivery.queue.clone()))?;
        let held_here = queue
            .unacked
            .get(delivery.tag.as_str())
            .is_some_and(|(holder, _)| *holder == self.consumer_id);
        if !held_here {
            return Err(BrokerError::PreconditionFailed(format!(
                "unknown delivery tag {}",
                delivery.tag.as_str()
            )));
        }
        queue
            .unacked
            .remove(delivery.tag.as_str())
            .map(|(_, message)| message)
            .ok_or_else(|| BrokerError::PreconditionFailed(format!("unknown delivery tag {}", delivery.tag.as_str())))
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<()> {
        let mut state = self.state.lock();
        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(BrokerError::PreconditionFailed(format!(
                "exchange {name} already declared as {}",
                existing.as_str()
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<()> {
        let mut state = self.state.lock();
        state
            .queues
            .entry(name.to_string())
            .or_default()
            .options = options;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::ExchangeNotFound(exchange.to_string()));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
        properties: MessageProperties,
    ) -> BrokerResult<usize> {
        let message = StoredMessage::new(exchange, routing_key, payload, properties);
        let routed = self.state.lock().publish(&message, Instant::now())?;
        if routed > 0 {
            self.notify.notify_waiters();
        }
        Ok(routed)
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();

            let next_due = {
                let mut state = self.state.lock();
                state.next_tag += 1;
                let tag = state.next_tag.to_string();
                let q = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

                q.promote_due(Instant::now());
                if let Some(message) = q.ready.pop_front() {
                    q.unacked
                        .insert(tag.clone(), (self.consumer_id.clone(), message.clone()));
                    return Ok(Some(message.into_delivery(queue, DeliveryTag::new(tag))));
                }
                q.next_due()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));

            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.settle(delivery).map(|_| ())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> BrokerResult<()> {
        let mut message = self.settle(delivery)?;
        let mut state = self.state.lock();

        if requeue {
            message.redelivered = true;
            if let Some(q) = state.queues.get_mut(&delivery.queue) {
                q.ready.push_front(message);
            }
        } else {
            let options = state
                .queues
                .get(&delivery.queue)
                .map(|q| q.options.clone())
                .unwrap_or_default();
            if let Some(dlx) = options.dead_letter_exchange {
                let routing_key = options
                    .dead_letter_routing_key
                    .unwrap_or_else(|| message.routing_key.clone());
                let dead = message.dead_lettered(&dlx, &routing_key, &delivery.queue);
                state.publish(&dead, Instant::now())?;
            }
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn renew_lease(&self, ttl: Duration) -> BrokerResult<()> {
        self.state
            .lock()
            .leases
            .insert(self.consumer_id.clone(), Instant::now() + ttl);
        Ok(())
    }

    async fn reclaim_orphaned(&self, queue: &str) -> BrokerResult<usize> {
        let count = self
            .state
            .lock()
            .reclaim(queue, &self.consumer_id, false, Instant::now())?;
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn recover(&self, queue: &str) -> BrokerResult<usize> {
        let count = self
            .state
            .lock()
            .reclaim(queue, &self.consumer_id, true, Instant::now())?;
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn ping(&self) -> BrokerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker
            .declare_exchange("chat.exchange", ExchangeKind::Topic)
            .await
            .unwrap();
        broker
            .declare_exchange("dlx.exchange", ExchangeKind::Topic)
            .await
            .unwrap();
        broker.declare_queue("q.dlq", QueueOptions::durable()).await.unwrap();
        broker.bind_queue("q.dlq", "dlx.exchange", "q").await.unwrap();
        broker
            .declare_queue("q", QueueOptions::durable().dead_letter("dlx.exchange", "q"))
            .await
            .unwrap();
        broker.bind_queue("q", "chat.exchange", "message.*").await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_topic_routing() {
        let broker = setup().await;

        let routed = broker
            .publish("chat.exchange", "message.sent", "a", MessageProperties::default())
            .await
            .unwrap();
        assert_eq!(routed, 1);

        let routed = broker
            .publish("chat.exchange", "presence.online", "b", MessageProperties::default())
            .await
            .unwrap();
        assert_eq!(routed, 0);
        assert_eq!(broker.messages("q"), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish("nope", "k", "x", MessageProperties::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ExchangeNotFound(_)));
    }

    #[tokio::test]
    async fn test_redeclare_with_other_kind_fails() {
        let broker = setup().await;
        let err = broker
            .declare_exchange("chat.exchange", ExchangeKind::Direct)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_receive_ack_removes_message() {
        let broker = setup().await;
        broker
            .publish("", "q", "direct", MessageProperties::default())
            .await
            .unwrap();

        let delivery = broker
            .receive("q", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, "direct");
        assert_eq!(broker.unacked_len("q"), 1);

        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_len("q"), 0);
        assert_eq!(broker.queue_len("q"), 0);
        assert!(broker.ack(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let broker = setup().await;
        let got = broker.receive("q", Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = setup().await;
        let publisher = broker.clone();

        let handle = tokio::spawn(async move {
            broker.receive("q", Duration::from_secs(5)).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher
            .publish("chat.exchange", "message.sent", "late", MessageProperties::default())
            .await
            .unwrap();

        let delivery = handle.await.unwrap().unwrap();
        assert_eq!(delivery.payload, "late");
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let broker = setup().await;
        broker
            .publish("chat.exchange", "message.sent", "poison", MessageProperties::default())
            .await
            .unwrap();
        let delivery = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();

        broker.nack(&delivery, false).await.unwrap();
        assert_eq!(broker.queue_len("q"), 0);
        assert_eq!(broker.messages("q.dlq"), vec!["poison".to_string()]);
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers_first() {
        let broker = setup().await;
        for body in ["one", "two"] {
            broker
                .publish("", "q", body, MessageProperties::default())
                .await
                .unwrap();
        }
        let first = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();
        broker.nack(&first, true).await.unwrap();

        let again = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.payload, "one");
        assert!(again.redelivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_held_back() {
        let broker = setup().await;
        broker
            .publish(
                "",
                "q",
                "later",
                MessageProperties::default().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert!(broker.receive("q", Duration::from_secs(1)).await.unwrap().is_none());

        let delivery = broker.receive("q", Duration::from_secs(10)).await.unwrap().unwrap();
        assert_eq!(delivery.payload, "later");
    }

    #[tokio::test]
    async fn test_recover_returns_unacked() {
        let broker = setup().await;
        broker
            .publish("", "q", "in-flight", MessageProperties::default())
            .await
            .unwrap();
        let _lost = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(broker.recover("q").await.unwrap(), 1);
        let again = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.payload, "in-flight");
        assert!(again.redelivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_deliveries_return_once_lease_lapses() {
        let broker = setup().await;
        let crashed = broker.as_consumer("server-100");
        let restarted = broker.as_consumer("server-200");
        crashed.renew_lease(Duration::from_secs(30)).await.unwrap();
        restarted.renew_lease(Duration::from_secs(30)).await.unwrap();

        broker
            .publish("", "q", "in-flight", MessageProperties::default())
            .await
            .unwrap();
        let held = crashed.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();

        // Holder still alive
        assert_eq!(restarted.recover("q").await.unwrap(), 0);
        assert_eq!(broker.unacked_len("q"), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        restarted.renew_lease(Duration::from_secs(30)).await.unwrap();
        assert_eq!(restarted.reclaim_orphaned("q").await.unwrap(), 1);

        let again = restarted.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.payload, "in-flight");
        assert!(again.redelivered);

        // The lapsed holder can no longer settle what it lost
        assert!(crashed.ack(&held).await.is_err());
        restarted.ack(&again).await.unwrap();
        assert_eq!(broker.unacked_len("q"), 0);
    }

    #[tokio::test]
    async fn test_reclaim_leaves_own_deliveries_alone() {
        let broker = setup().await;
        broker
            .publish("", "q", "mine", MessageProperties::default())
            .await
            .unwrap();
        let _held = broker.receive("q", Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(broker.reclaim_orphaned("q").await.unwrap(), 0);
        assert_eq!(broker.unacked_len("q"), 1);
    }

    #[tokio::test]
    async fn test_holder_without_lease_is_orphaned() {
        let broker = setup().await;
        broker
            .publish("", "q", "never-leased", MessageProperties::default())
            .await
            .unwrap();
        let _held = broker
            .as_consumer("server-100")
            .receive("q", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(broker.recover("q").await.unwrap(), 1);
        assert_eq!(broker.queue_len("q"), 1);
    }
}
