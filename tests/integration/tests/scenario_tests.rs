//! Delivery scenarios over the in-memory adapters
//!
//! Run with: cargo test -p integration-tests --test scenario_tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::constants::{exchanges, queues, routing_keys};
use chat_core::{ChatEvent, ConnectionId, EmitTarget, ServerEvent, UserId};
use chat_queue::{
    BrokerChannel, Consumer, ConsumerConfig, DeliveryOutcome, InMemoryBroker, MessageContext,
    MessageHandler, MessageProperties, ProcessError,
};
use chat_service::DeliveryHandler;
use integration_tests::{create_error, message_sent, message_sent_json, ClusterFixture};
use parking_lot::Mutex;

// ============================================================================
// Registry and presence
// ============================================================================

#[tokio::test]
async fn test_user_stays_online_until_last_connection_closes() {
    let f = ClusterFixture::new();
    let u1 = UserId::new("u1");

    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u1", "c2").await;
    assert!(f.registry().is_online(&u1).await.unwrap());
    assert_eq!(f.registry().connection_count(&u1).await.unwrap(), 2);

    let seen_at_connect = f.presence().get_last_seen(&u1).await.unwrap().unwrap();

    f.disconnect(&f.s1, "c1").await;
    assert!(f.registry().is_online(&u1).await.unwrap());
    assert!(f.presence().is_online(&u1).await.unwrap());

    f.clock.advance(chrono::Duration::seconds(5));
    f.disconnect(&f.s2, "c2").await;
    assert!(!f.registry().is_online(&u1).await.unwrap());
    assert!(!f.presence().is_online(&u1).await.unwrap());
    let seen_at_disconnect = f.presence().get_last_seen(&u1).await.unwrap().unwrap();
    assert!(seen_at_disconnect > seen_at_connect);
    assert_eq!(f.registry().get_total_connections().await.unwrap(), 0);
}

#[tokio::test]
async fn test_connections_are_attributed_to_their_server() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u2", "c2").await;
    f.connect(&f.s2, "u3", "c3").await;

    let mut on_s2 = f.registry().get_server_connections("s2").await.unwrap();
    on_s2.sort();
    assert_eq!(on_s2, vec![ConnectionId::new("c2"), ConnectionId::new("c3")]);

    let stats = f.s1.registry().get_stats().await.unwrap();
    assert_eq!(stats.server_id, "s1");
    assert_eq!(stats.total_connections, 3);
    assert_eq!(stats.online_users, 3);
    assert_eq!(stats.current_server_connections, 1);

    let metadata = f
        .registry()
        .get_metadata(&ConnectionId::new("c2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.server_id, "s2");
    assert_eq!(metadata.user_id, UserId::new("u2"));
}

#[tokio::test]
async fn test_presence_lapses_without_heartbeat() {
    let f = ClusterFixture::new();
    let u1 = UserId::new("u1");
    f.connect(&f.s1, "u1", "c1").await;

    f.clock.advance(chrono::Duration::seconds(45));
    f.presence().heartbeat(&u1).await.unwrap();
    f.clock.advance(chrono::Duration::seconds(45));
    assert!(f.presence().is_online(&u1).await.unwrap());

    f.clock.advance(chrono::Duration::seconds(30));
    assert!(!f.presence().is_online(&u1).await.unwrap());
    // The registry still holds the socket; only the presence marker lapsed
    assert!(f.registry().is_online(&u1).await.unwrap());
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_online_recipient_receives_one_emit_and_sender_none() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u2", "c3").await;

    let report = f
        .delivery
        .handle(message_sent("m1", "u1", &["u1", "u2"]))
        .await
        .unwrap();
    assert_eq!(report.delivered, vec![ConnectionId::new("c3")]);

    let emitted = f.emitter.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].0, EmitTarget::connection(ConnectionId::new("c3")));
    assert_eq!(emitted[0].1.name(), "message:new");
    assert!(f.emitter.connections_for("message:new").iter().all(|c| c.as_str() != "c1"));
}

#[tokio::test]
async fn test_offline_recipient_is_queued_in_inbox() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;

    let report = f
        .delivery
        .handle(message_sent("m1", "u1", &["u1", "u2"]))
        .await
        .unwrap();

    assert!(report.delivered.is_empty());
    assert!(f.emitter.emitted().is_empty());
    assert_eq!(f.inbox.pending(&UserId::new("u2")).await.unwrap(), vec!["m1"]);
}

#[tokio::test]
async fn test_create_error_for_disconnected_sender_is_dropped() {
    let f = ClusterFixture::new();

    let report = f.delivery.handle(create_error("temp:1:u3", "u3")).await.unwrap();

    assert!(report.dropped);
    assert!(f.emitter.emitted().is_empty());
}

#[tokio::test]
async fn test_multi_device_recipient_receives_on_every_connection() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s1, "u2", "c2").await;
    f.connect(&f.s2, "u2", "c3").await;

    f.delivery
        .handle(message_sent("m1", "u1", &["u1", "u2"]))
        .await
        .unwrap();

    let mut targets = f.emitter.connections_for("message:new");
    targets.sort();
    assert_eq!(targets, vec![ConnectionId::new("c2"), ConnectionId::new("c3")]);
}

// ============================================================================
// Consumer retry
// ============================================================================

/// Delivery handler that fails its first `failures` attempts
struct FlakyDelivery {
    inner: DeliveryHandler,
    failures: u32,
    attempts: Mutex<Vec<u32>>,
}

#[async_trait]
impl MessageHandler for FlakyDelivery {
    type Event = ChatEvent;

    fn name(&self) -> &'static str {
        "flaky-delivery"
    }

    async fn process(&self, event: ChatEvent, ctx: &MessageContext) -> Result<(), ProcessError> {
        self.attempts.lock().push(ctx.retry_count);
        if ctx.retry_count < self.failures {
            return Err(ProcessError::handler("persistence not caught up"));
        }
        self.inner.process(event, ctx).await
    }
}

async fn delivery_consumer(
    f: &ClusterFixture,
    failures: u32,
) -> (InMemoryBroker, Consumer<FlakyDelivery>) {
    let broker = InMemoryBroker::new();
    let config = ConsumerConfig::new(queues::MESSAGE_DELIVERY)
        .bind(exchanges::CHAT, routing_keys::MESSAGE_SENT)
        .max_retries(3)
        .retry_delay(Duration::ZERO);
    let consumer = Consumer::new(
        Arc::new(broker.clone()),
        FlakyDelivery {
            inner: f.delivery.clone(),
            failures,
            attempts: Mutex::new(Vec::new()),
        },
        config,
    );
    consumer.initialize().await.unwrap();
    (broker, consumer)
}

async fn drain<H: MessageHandler>(broker: &InMemoryBroker, consumer: &Consumer<H>) -> Vec<DeliveryOutcome> {
    let mut outcomes = Vec::new();
    while let Some(delivery) = broker
        .receive(queues::MESSAGE_DELIVERY, Duration::from_millis(20))
        .await
        .unwrap()
    {
        outcomes.push(consumer.handle_delivery(delivery).await.unwrap());
    }
    outcomes
}

async fn publish_sent(broker: &InMemoryBroker, participants: &[&str]) {
    broker
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_SENT,
            &message_sent_json("m1", "u1", participants).to_string(),
            MessageProperties::default().with_message_id("m1"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_always_failing_message_is_dead_lettered_after_max_retries() {
    let f = ClusterFixture::new();
    let (broker, consumer) = delivery_consumer(&f, u32::MAX).await;
    publish_sent(&broker, &["u1", "u2"]).await;

    let outcomes = drain(&broker, &consumer).await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.last(), Some(&DeliveryOutcome::DeadLettered));
    assert_eq!(*consumer.handler().attempts.lock(), vec![0, 1, 2, 3]);

    let dead = broker.messages(&queues::dead_letter(queues::MESSAGE_DELIVERY));
    assert_eq!(dead.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&dead[0]).unwrap();
    assert_eq!(body["messageId"], "m1");
    assert_eq!(broker.queue_len(queues::MESSAGE_DELIVERY), 0);
}

#[tokio::test]
async fn test_transient_failures_deliver_exactly_once() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u2", "c3").await;
    let (broker, consumer) = delivery_consumer(&f, 2).await;
    publish_sent(&broker, &["u1", "u2"]).await;

    let outcomes = drain(&broker, &consumer).await;

    assert_eq!(
        outcomes,
        vec![
            DeliveryOutcome::Retried { next_retry: 1 },
            DeliveryOutcome::Retried { next_retry: 2 },
            DeliveryOutcome::Acked,
        ]
    );
    assert_eq!(*consumer.handler().attempts.lock(), vec![0, 1, 2]);
    assert_eq!(f.emitter.connections_for("message:new"), vec![ConnectionId::new("c3")]);
    assert_eq!(broker.queue_len(&queues::dead_letter(queues::MESSAGE_DELIVERY)), 0);
    assert_eq!(broker.unacked_len(queues::MESSAGE_DELIVERY), 0);
}

#[tokio::test]
async fn test_emit_failure_is_retried_through_the_queue() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u2", "c3").await;
    let (broker, consumer) = delivery_consumer(&f, 0).await;
    f.emitter.fail_next(1);
    publish_sent(&broker, &["u1", "u2"]).await;

    let outcomes = drain(&broker, &consumer).await;

    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::Retried { next_retry: 1 }, DeliveryOutcome::Acked]
    );
    let delivered: Vec<ServerEvent> = f.emitter.emitted().into_iter().map(|(_, e)| e).collect();
    assert_eq!(delivered.len(), 1);
}

#[tokio::test]
async fn test_retried_delivery_queues_offline_recipient_once() {
    let f = ClusterFixture::new();
    f.connect(&f.s1, "u1", "c1").await;
    f.connect(&f.s2, "u2", "c3").await;
    let (broker, consumer) = delivery_consumer(&f, 0).await;
    f.emitter.fail_next(1);
    publish_sent(&broker, &["u1", "u3", "u2"]).await;

    let outcomes = drain(&broker, &consumer).await;

    assert_eq!(
        outcomes,
        vec![DeliveryOutcome::Retried { next_retry: 1 }, DeliveryOutcome::Acked]
    );
    assert_eq!(f.inbox.pending(&UserId::new("u3")).await.unwrap(), vec!["m1"]);
    assert_eq!(f.emitter.connections_for("message:new"), vec![ConnectionId::new("c3")]);
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let f = ClusterFixture::new();
    let (broker, consumer) = delivery_consumer(&f, 0).await;
    broker
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_SENT,
            r#"{"eventType":"message.archived","messageId":"m9"}"#,
            MessageProperties::default(),
        )
        .await
        .unwrap();

    assert_eq!(drain(&broker, &consumer).await, vec![DeliveryOutcome::Acked]);
    assert!(f.emitter.emitted().is_empty());
}
