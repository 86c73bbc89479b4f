//! WebSocket handler
//!
//! Authenticates the handshake, registers the socket, then runs the read
//! loop until the client goes away, the idle timeout fires or the writer
//! stops. Every exit goes through the same disconnect path.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::IntoResponse,
};
use chat_common::AppError;
use chat_core::events::{ConnectionErrorPayload, ConnectionSuccess};
use chat_core::{ClientInfo, ConnectionId, ServerEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::connection::Connection;
use crate::handlers::MessageDispatcher;
use crate::protocol::{ack_error, AckFrame, ClientFrame, CloseCode, OutboundFrame};
use crate::server::GatewayState;

/// Channel buffer size for outgoing frames
const MESSAGE_BUFFER_SIZE: usize = 100;

/// Handshake query string
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket gateway handler (`GET /ws`)
pub async fn ws_handler(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = handshake_token(params, &headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());

    ws.on_upgrade(move |socket| handle_socket(state, socket, token, ClientInfo::new(user_agent, ip)))
}

/// Token from `?token=`, else the `Authorization` header
fn handshake_token(params: ConnectParams, headers: &HeaderMap) -> String {
    params
        .token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_default()
}

fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.as_u16(),
        reason: code.reason().into(),
    }))
}

/// Send `connection:error` and close without registering anything
async fn reject(sink: &mut SplitSink<WebSocket, Message>, error: String, code: CloseCode) {
    let frame = OutboundFrame::from(ServerEvent::ConnectionError(ConnectionErrorPayload { error }));
    if let Ok(Some(text)) = frame.to_text() {
        let _ = sink.send(Message::Text(text.into())).await;
    }
    let _ = sink.send(close_message(code)).await;
    let _ = sink.close().await;
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket, token: String, info: ClientInfo) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let user_id = match state.jwt().authenticate(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "Socket authentication failed");
            reject(
                &mut ws_sink,
                AppError::MissingAuth.to_string(),
                CloseCode::AuthenticationFailed,
            )
            .await;
            return;
        }
    };

    let connection_id = ConnectionId::generate();
    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(MESSAGE_BUFFER_SIZE);
    let connection = state
        .connections()
        .add_connection(connection_id.clone(), user_id.clone(), tx);

    if let Err(e) = state.lifecycle().connect(&user_id, &connection_id, info).await {
        tracing::error!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %e,
            "Connection registration failed"
        );
        state.connections().remove_connection(&connection_id);
        reject(&mut ws_sink, e.to_string(), CloseCode::RegistrationFailed).await;
        return;
    }

    let success = ServerEvent::ConnectionSuccess(ConnectionSuccess {
        user_id: user_id.clone(),
        socket_id: connection_id.clone(),
        server_id: state.server_id().to_string(),
        timestamp: state.clock().now(),
    });
    if connection.try_send(success.into()).is_err() {
        tracing::warn!(connection_id = %connection_id, "Failed to queue connection:success");
    }

    // Writer: drains the outbound channel into the socket
    let writer_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match &frame {
                OutboundFrame::Close(code) => {
                    let _ = ws_sink.send(close_message(*code)).await;
                    break;
                }
                _ => match frame.to_text() {
                    Ok(Some(text)) => Message::Text(text.into()),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(connection_id = %writer_id, error = %e, "Failed to encode frame");
                        continue;
                    }
                },
            };
            if ws_sink.send(message).await.is_err() {
                tracing::debug!(connection_id = %writer_id, "Failed to write to WebSocket");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let idle_timeout = state.config().presence.idle_timeout();
    let mut idle_check = tokio::time::interval(idle_timeout / 4);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut writer_done = false;

    loop {
        tokio::select! {
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    connection.touch();
                    handle_text_message(&state, &connection, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    connection.touch();
                    tracing::debug!(connection_id = %connection_id, "Binary frames not supported");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.touch(),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(connection_id = %connection_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = idle_check.tick() => {
                let idle = connection.idle_for();
                if idle >= idle_timeout {
                    tracing::info!(
                        connection_id = %connection_id,
                        idle_ms = idle.as_millis(),
                        "Closing idle connection"
                    );
                    connection.close(CloseCode::IdleTimeout);
                }
            }
            _ = &mut send_task, if !writer_done => {
                writer_done = true;
                break;
            }
        }
    }

    state.connections().remove_connection(&connection_id);
    drop(connection);
    if !writer_done {
        send_task.abort();
    }

    if let Err(e) = state.lifecycle().disconnect(&connection_id).await {
        tracing::error!(
            user_id = %user_id,
            connection_id = %connection_id,
            error = %e,
            "Disconnect cleanup failed"
        );
    }
}

/// Dispatch one text frame and answer its `ackId`, if any
async fn handle_text_message(state: &GatewayState, connection: &Arc<Connection>, text: &str) {
    let frame = match ClientFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Malformed frame ignored");
            return;
        }
    };

    let body = match MessageDispatcher::dispatch(state, connection, &frame).await {
        Ok(body) => body,
        Err(e) => {
            if e.is_client_error() {
                tracing::debug!(connection_id = %connection.id(), event = %frame.event, error = %e, "Request rejected");
            } else {
                tracing::error!(connection_id = %connection.id(), event = %frame.event, error = %e, "Handler failed");
            }
            ack_error(e.client_message())
        }
    };

    if let Some(ack_id) = frame.ack_id {
        if connection
            .send(OutboundFrame::Ack(AckFrame::new(ack_id, body)))
            .await
            .is_err()
        {
            tracing::debug!(connection_id = %connection.id(), "Writer gone before ack");
        }
    }
}
