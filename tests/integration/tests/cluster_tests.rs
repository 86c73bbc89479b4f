//! Two gateway instances sharing one store, broker and pub/sub bus
//!
//! Run with: cargo test -p integration-tests --test cluster_tests

use std::time::Duration;

use chat_core::constants::{exchanges, routing_keys};
use chat_gateway::Infrastructure;
use integration_tests::{assert_json, message_sent_json, unique_user, TestServer};
use reqwest::StatusCode;
use serde_json::{json, Value};

const QUIET: Duration = Duration::from_millis(300);

async fn cluster() -> (TestServer, TestServer) {
    let infra = Infrastructure::in_memory();
    let s1 = TestServer::start_on("s1", infra.clone())
        .await
        .expect("Failed to start s1");
    let s2 = TestServer::start_on("s2", infra)
        .await
        .expect("Failed to start s2");
    (s1, s2)
}

#[tokio::test]
async fn test_message_reaches_recipient_on_other_instance_once() {
    let (s1, s2) = cluster().await;
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (mut alice_ws, _) = s1.connect(&alice).await.unwrap();
    let (mut bob_ws, success) = s2.connect(&bob).await.unwrap();
    assert_eq!(success["serverId"], "s2");

    s1.state()
        .publisher()
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_SENT,
            &message_sent_json("m-1", alice.as_str(), &[alice.as_str(), bob.as_str()]),
            Some("m-1"),
        )
        .await
        .unwrap();

    let message = bob_ws.expect_event("message:new").await.unwrap();
    assert_eq!(message["messageId"], "m-1");
    bob_ws.assert_no_event("message:new", QUIET).await.unwrap();
    alice_ws.assert_no_event("message:new", QUIET).await.unwrap();
}

#[tokio::test]
async fn test_every_device_receives_across_instances() {
    let (s1, s2) = cluster().await;
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (_alice_ws, _) = s1.connect(&alice).await.unwrap();
    let (mut bob_phone, _) = s1.connect(&bob).await.unwrap();
    let (mut bob_laptop, _) = s2.connect(&bob).await.unwrap();

    s2.state()
        .publisher()
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_SENT,
            &message_sent_json("m-2", alice.as_str(), &[alice.as_str(), bob.as_str()]),
            Some("m-2"),
        )
        .await
        .unwrap();

    for ws in [&mut bob_phone, &mut bob_laptop] {
        let message = ws.expect_event("message:new").await.unwrap();
        assert_eq!(message["messageId"], "m-2");
    }
}

#[tokio::test]
async fn test_typing_crosses_instances_within_room() {
    let (s1, s2) = cluster().await;
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let carol = unique_user("carol");
    let (mut alice_ws, _) = s1.connect(&alice).await.unwrap();
    let (mut bob_ws, _) = s2.connect(&bob).await.unwrap();
    let (mut carol_ws, _) = s2.connect(&carol).await.unwrap();

    for ws in [&mut alice_ws, &mut bob_ws] {
        let ack = ws
            .request("conversation:join", json!({ "conversationId": "conv-x" }))
            .await
            .unwrap();
        assert_eq!(ack["success"], true);
    }

    alice_ws
        .request("typing:start", json!({ "conversationId": "conv-x" }))
        .await
        .unwrap();

    let update = bob_ws.expect_event("typing:update").await.unwrap();
    assert_eq!(update["userId"], alice.as_str());
    assert_eq!(update["isTyping"], true);
    alice_ws.assert_no_event("typing:update", QUIET).await.unwrap();
    carol_ws.assert_no_event("typing:update", QUIET).await.unwrap();
}

#[tokio::test]
async fn test_presence_change_is_seen_on_every_instance() {
    let (s1, s2) = cluster().await;
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (mut bob_ws, _) = s2.connect(&bob).await.unwrap();

    let (alice_ws, _) = s1.connect(&alice).await.unwrap();

    let update = loop {
        let update = bob_ws.expect_event("presence:update").await.unwrap();
        if update["userId"] == alice.as_str() {
            break update;
        }
    };
    assert_eq!(update["status"], "online");

    alice_ws.close().await.unwrap();
    let update = loop {
        let update = bob_ws.expect_event("presence:update").await.unwrap();
        if update["userId"] == alice.as_str() {
            break update;
        }
    };
    assert_eq!(update["status"], "offline");
    assert!(update["lastSeen"].is_string());
}

#[tokio::test]
async fn test_admin_stats_span_the_cluster() {
    let (s1, s2) = cluster().await;
    let (_a, _) = s1.connect(&unique_user("alice")).await.unwrap();
    let (_b, _) = s2.connect(&unique_user("bob")).await.unwrap();
    let (_c, _) = s2.connect(&unique_user("carol")).await.unwrap();

    let stats: Value = assert_json(s1.get("/admin/stats").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(stats["serverId"], "s1");
    assert_eq!(stats["totalConnections"], 3);
    assert_eq!(stats["onlineUsers"], 3);
    assert_eq!(stats["currentServerConnections"], 1);

    let on_s2: Value = assert_json(
        s1.get("/admin/connections/server/s2").await.unwrap(),
        StatusCode::OK,
    )
    .await
    .unwrap();
    assert_eq!(on_s2["serverId"], "s2");
    assert_eq!(on_s2["connections"], 2);
}
