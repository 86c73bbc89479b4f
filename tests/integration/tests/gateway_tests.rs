//! Gateway tests against a live instance on an ephemeral port
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use chat_core::constants::{exchanges, routing_keys};
use chat_core::UserId;
use chat_queue::QueueOptions;
use chat_service::OfflineInbox;
use integration_tests::{
    assert_json, eventually, message_sent_json, unique_user, TestServer, WsClient,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

const QUIET: Duration = Duration::from_millis(300);

// ============================================================================
// Health and admin
// ============================================================================

#[tokio::test]
async fn test_probes_report_a_started_gateway() {
    let server = TestServer::start().await.expect("Failed to start server");

    let live: Value = assert_json(server.get("/health/liveness").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(live["status"], "ok");

    let ready: Value = assert_json(server.get("/health/readiness").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["redis"], "connected");
    assert_eq!(ready["stats"]["serverId"], "s1");

    let startup: Value = assert_json(server.get("/health/startup").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(startup["status"], "started");
}

#[tokio::test]
async fn test_admin_views_follow_connections() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let (_ws, _) = server.connect(&alice).await.unwrap();

    let stats: Value = assert_json(server.get("/admin/stats").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(stats["totalConnections"], 1);
    assert_eq!(stats["currentServerConnections"], 1);

    let user: Value = assert_json(
        server
            .get(&format!("/admin/connections/user/{alice}"))
            .await
            .unwrap(),
        StatusCode::OK,
    )
    .await
    .unwrap();
    assert_eq!(user["isOnline"], true);
    assert_eq!(user["connectionCount"], 1);

    let online: Value = assert_json(server.get("/admin/users/online").await.unwrap(), StatusCode::OK)
        .await
        .unwrap();
    assert_eq!(online["onlineUsers"], json!([alice.as_str()]));
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_connect_announces_identity() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");

    let (_ws, success) = server.connect(&alice).await.unwrap();

    assert_eq!(success["userId"], alice.as_str());
    assert_eq!(success["serverId"], "s1");
    assert!(success["socketId"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(server.state().registry().is_online(&alice).await.unwrap());
    assert!(server.state().presence().is_online(&alice).await.unwrap());
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");

    let mut ws = WsClient::connect(&server.ws_url(Some("not-a-jwt"))).await.unwrap();
    let error = ws.expect_event("connection:error").await.unwrap();
    assert_eq!(error["error"], "Authentication required");
    assert_eq!(ws.expect_close().await.unwrap(), Some(4001));

    assert_eq!(
        server.state().registry().get_total_connections().await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");

    let mut ws = WsClient::connect(&server.ws_url(None)).await.unwrap();
    ws.expect_event("connection:error").await.unwrap();
    assert_eq!(ws.expect_close().await.unwrap(), Some(4001));
}

#[tokio::test]
async fn test_disconnect_marks_user_offline() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let (ws, _) = server.connect(&alice).await.unwrap();

    ws.close().await.unwrap();

    let state = server.state().clone();
    eventually("alice offline", || {
        let state = state.clone();
        let alice = alice.clone();
        async move {
            !state.registry().is_online(&alice).await.unwrap_or(true)
                && !state.presence().is_online(&alice).await.unwrap_or(true)
        }
    })
    .await
    .unwrap();
    assert!(state.presence().get_last_seen(&alice).await.unwrap().is_some());
    assert_eq!(state.registry().get_total_connections().await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_sockets_with_going_away() {
    let server = TestServer::start().await.expect("Failed to start server");
    let (mut ws, _) = server.connect(&unique_user("alice")).await.unwrap();

    server.stop().await.unwrap();

    assert_eq!(ws.expect_close().await.unwrap(), Some(1001));
}

// ============================================================================
// Client events
// ============================================================================

#[tokio::test]
async fn test_join_and_leave_are_acknowledged() {
    let server = TestServer::start().await.expect("Failed to start server");
    let (mut ws, _) = server.connect(&unique_user("alice")).await.unwrap();

    let ack = ws
        .request("conversation:join", json!({ "conversationId": "conv-1" }))
        .await
        .unwrap();
    assert_eq!(ack, json!({ "success": true }));

    let ack = ws.request("conversation:join", json!({})).await.unwrap();
    assert_eq!(ack["success"], false);
    assert_eq!(ack["error"], "Conversation ID required");

    let ack = ws
        .request("conversation:leave", json!({ "conversationId": "conv-1" }))
        .await
        .unwrap();
    assert_eq!(ack["success"], true);
}

#[tokio::test]
async fn test_send_queues_a_create_request() {
    let server = TestServer::start().await.expect("Failed to start server");
    let broker = server.state().infra().broker.clone();
    broker
        .declare_queue("persistence-queue", QueueOptions::durable())
        .await
        .unwrap();
    broker
        .bind_queue(
            "persistence-queue",
            exchanges::CHAT,
            routing_keys::MESSAGE_CREATE_REQUEST,
        )
        .await
        .unwrap();

    let alice = unique_user("alice");
    let (mut ws, _) = server.connect(&alice).await.unwrap();
    let ack = ws
        .request(
            "message:send",
            json!({ "conversationId": "conv-1", "content": "hi" }),
        )
        .await
        .unwrap();

    assert_eq!(ack["success"], true);
    let temp_id = ack["messageId"].as_str().unwrap().to_string();
    assert!(temp_id.starts_with("temp:"));
    assert!(temp_id.ends_with(alice.as_str()));

    let delivery = broker
        .receive("persistence-queue", Duration::from_secs(1))
        .await
        .unwrap()
        .expect("create request queued");
    let body: Value = serde_json::from_str(&delivery.payload).unwrap();
    assert_eq!(body["eventType"], "message.create-request");
    assert_eq!(body["tempMessageId"], temp_id.as_str());
    assert_eq!(body["senderId"], alice.as_str());
    assert_eq!(body["type"], "text");
    assert_eq!(body["metadata"], json!({}));
}

#[tokio::test]
async fn test_send_without_content_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");
    let (mut ws, _) = server.connect(&unique_user("alice")).await.unwrap();

    let ack = ws
        .request("message:send", json!({ "conversationId": "conv-1" }))
        .await
        .unwrap();

    assert_eq!(ack["success"], false);
    assert_eq!(ack["error"], "Missing required fields: conversationId and content");
}

#[tokio::test]
async fn test_unknown_event_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");
    let (mut ws, _) = server.connect(&unique_user("alice")).await.unwrap();

    let ack = ws.request("conversation:archive", json!({})).await.unwrap();

    assert_eq!(ack["success"], false);
    assert_eq!(ack["error"], "Unknown event: conversation:archive");
}

#[tokio::test]
async fn test_typing_reaches_other_room_members_only() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (mut alice_ws, _) = server.connect(&alice).await.unwrap();
    let (mut bob_ws, _) = server.connect(&bob).await.unwrap();

    for ws in [&mut alice_ws, &mut bob_ws] {
        ws.request("conversation:join", json!({ "conversationId": "conv-1" }))
            .await
            .unwrap();
    }

    let ack = alice_ws
        .request("typing:start", json!({ "conversationId": "conv-1" }))
        .await
        .unwrap();
    assert_eq!(ack["success"], true);

    let update = bob_ws.expect_event("typing:update").await.unwrap();
    assert_eq!(
        update,
        json!({ "conversationId": "conv-1", "userId": alice.as_str(), "isTyping": true })
    );
    alice_ws.assert_no_event("typing:update", QUIET).await.unwrap();
}

#[tokio::test]
async fn test_typing_outside_room_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");
    let (mut ws, _) = server.connect(&unique_user("alice")).await.unwrap();

    let ack = ws
        .request("typing:start", json!({ "conversationId": "conv-9" }))
        .await
        .unwrap();

    assert_eq!(ack["success"], false);
    assert_eq!(ack["error"], "Not in conversation");
}

#[tokio::test]
async fn test_heartbeat_restores_lapsed_presence() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let (mut ws, _) = server.connect(&alice).await.unwrap();

    // Simulate the marker expiring between heartbeats
    server.state().presence().set_offline(&alice).await.unwrap();
    assert!(!server.state().presence().is_online(&alice).await.unwrap());

    let ack = ws.request("presence:heartbeat", Value::Null).await.unwrap();
    assert_eq!(ack["success"], true);
    assert!(server.state().presence().is_online(&alice).await.unwrap());
}

// ============================================================================
// Broker-driven delivery
// ============================================================================

async fn publish_message_sent(server: &TestServer, message_id: &str, sender: &UserId, to: &UserId) {
    server
        .state()
        .publisher()
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_SENT,
            &message_sent_json(message_id, sender.as_str(), &[sender.as_str(), to.as_str()]),
            Some(message_id),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_persisted_message_reaches_recipient_not_sender() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (mut alice_ws, _) = server.connect(&alice).await.unwrap();
    let (mut bob_ws, _) = server.connect(&bob).await.unwrap();

    publish_message_sent(&server, "m-100", &alice, &bob).await;

    let message = bob_ws.expect_event("message:new").await.unwrap();
    assert_eq!(message["messageId"], "m-100");
    assert_eq!(message["senderId"], alice.as_str());
    assert_eq!(message["content"], "hello there");
    alice_ws.assert_no_event("message:new", QUIET).await.unwrap();
}

#[tokio::test]
async fn test_persisted_message_for_offline_user_lands_in_inbox() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let bob = unique_user("bob");
    let (_alice_ws, _) = server.connect(&alice).await.unwrap();

    publish_message_sent(&server, "m-200", &alice, &bob).await;

    let inbox = OfflineInbox::new(server.state().infra().store.clone());
    eventually("inbox entry", || {
        let inbox = inbox.clone();
        let bob = bob.clone();
        async move { inbox.pending(&bob).await.unwrap_or_default() == vec!["m-200".to_string()] }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_confirmation_goes_to_sender() {
    let server = TestServer::start().await.expect("Failed to start server");
    let alice = unique_user("alice");
    let (mut ws, _) = server.connect(&alice).await.unwrap();

    server
        .state()
        .publisher()
        .publish(
            exchanges::CHAT,
            routing_keys::MESSAGE_CONFIRMED,
            &json!({
                "eventType": "message.confirmed",
                "messageId": "m-300",
                "tempMessageId": "temp:1:alice",
                "senderId": alice.as_str(),
                "conversationId": "conv-1"
            }),
            None,
        )
        .await
        .unwrap();

    let confirmed = ws.expect_event("message:confirmed").await.unwrap();
    assert_eq!(confirmed["realMessageId"], "m-300");
    assert_eq!(confirmed["tempMessageId"], "temp:1:alice");
}
