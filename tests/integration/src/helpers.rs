//! Test helpers for integration tests
//!
//! Provides utilities for spawning gateway instances on ephemeral ports,
//! driving them over HTTP and WebSocket, and waiting on eventual state.

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chat_common::{AppConfig, AppError};
use chat_core::UserId;
use chat_gateway::{serve, GatewayRuntime, GatewayState, Infrastructure};
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const TEST_SECRET: &str = "integration-secret-with-enough-length-for-hs256";

/// How long a socket read may take before the test fails
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway configuration for `server_id` with fast consumer retries
pub fn test_config(server_id: &str) -> AppConfig {
    let vars = [
        ("GATEWAY_PORT", "0"),
        ("GATEWAY_HOST", "127.0.0.1"),
        ("REDIS_URL", "redis://127.0.0.1:6379"),
        ("JWT_SECRET", TEST_SECRET),
        ("SERVER_ID", server_id),
        ("CONSUMER_RETRY_DELAY_MS", "0"),
        ("APP_ENV", "development"),
    ];
    AppConfig::from_lookup(|name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| (*value).to_string())
    })
    .expect("test config")
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Test server instance that manages lifecycle
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    state: GatewayState,
    runtime: Option<GatewayRuntime>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), AppError>>>,
}

impl TestServer {
    /// Start a single gateway over fresh in-memory adapters
    pub async fn start() -> Result<Self> {
        Self::start_on("s1", Infrastructure::in_memory()).await
    }

    /// Start a gateway named `server_id` over `infra`. Instances given clones
    /// of the same infrastructure form one cluster.
    pub async fn start_on(server_id: &str, infra: Infrastructure) -> Result<Self> {
        let state = GatewayState::new(test_config(server_id), infra);
        let runtime = GatewayRuntime::start(state.clone())
            .await
            .context("gateway runtime")?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, state.clone(), async move {
            let _ = shutdown_rx.await;
        }));

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            client,
            state,
            runtime: Some(runtime),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={token}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// Access token accepted by this gateway
    pub fn token_for(&self, user_id: &UserId) -> Result<String> {
        Ok(self.state.jwt().issue_access_token(user_id)?)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Open an authenticated socket for `user_id` and wait for
    /// `connection:success`, returning its payload
    pub async fn connect(&self, user_id: &UserId) -> Result<(WsClient, Value)> {
        let token = self.token_for(user_id)?;
        let mut ws = WsClient::connect(&self.ws_url(Some(&token))).await?;
        let success = ws.expect_event("connection:success").await?;
        Ok((ws, success))
    }

    /// Stop serving, close sockets, then stop consumers and the broadcaster
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(FRAME_TIMEOUT, handle)
                .await
                .context("server did not stop")???;
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown().await;
        }
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A frame read from the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json(Value),
    Closed(Option<u16>),
}

/// Socket client speaking the gateway's `{event, data, ackId}` frames
pub struct WsClient {
    stream: WsStream,
    next_ack: u64,
    pending: VecDeque<Value>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = tokio::time::timeout(FRAME_TIMEOUT, connect_async(url))
            .await
            .context("websocket handshake timed out")??;
        Ok(Self {
            stream,
            next_ack: 1,
            pending: VecDeque::new(),
        })
    }

    /// Send a frame without asking for an ack
    pub async fn send(&mut self, event: &str, data: Value) -> Result<()> {
        let frame = json!({ "event": event, "data": data });
        self.stream.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send a frame and wait for its ack, returning the ack body
    pub async fn request(&mut self, event: &str, data: Value) -> Result<Value> {
        let ack_id = self.next_ack;
        self.next_ack += 1;

        let frame = json!({ "event": event, "data": data, "ackId": ack_id });
        self.stream.send(Message::Text(frame.to_string())).await?;

        loop {
            match self.read().await? {
                Frame::Json(value)
                    if value["event"] == "ack" && value["ackId"].as_u64() == Some(ack_id) =>
                {
                    return Ok(value["data"].clone());
                }
                Frame::Json(other) => self.pending.push_back(other),
                Frame::Closed(code) => bail!("socket closed ({code:?}) while waiting for ack {ack_id}"),
            }
        }
    }

    /// Next event named `name`, skipping any other event
    pub async fn expect_event(&mut self, name: &str) -> Result<Value> {
        if let Some(index) = self.pending.iter().position(|v| v["event"] == name) {
            let frame = self.pending.remove(index).unwrap_or_default();
            return Ok(frame["data"].clone());
        }
        loop {
            match self.read().await? {
                Frame::Json(value) if value["event"] == name => return Ok(value["data"].clone()),
                Frame::Json(_) => {}
                Frame::Closed(code) => bail!("socket closed ({code:?}) while waiting for {name}"),
            }
        }
    }

    /// Decode the next event named `name` into `T`
    pub async fn expect<T: DeserializeOwned>(&mut self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.expect_event(name).await?)?)
    }

    /// Assert no `name` event arrives within `wait`
    pub async fn assert_no_event(&mut self, name: &str, wait: Duration) -> Result<()> {
        if self.pending.iter().any(|v| v["event"] == name) {
            bail!("unexpected {name} already received");
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Err(_) | Ok(None) => return Ok(()),
                Ok(Some(message)) => {
                    if let Message::Text(text) = message? {
                        let value: Value = serde_json::from_str(&text)?;
                        if value["event"] == name {
                            bail!("unexpected {name}: {value}");
                        }
                    }
                }
            }
        }
    }

    /// Read until the server closes the socket and return the close code
    pub async fn expect_close(&mut self) -> Result<Option<u16>> {
        loop {
            if let Frame::Closed(code) = self.read().await? {
                return Ok(code);
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Frame> {
        loop {
            let message = tokio::time::timeout(FRAME_TIMEOUT, self.stream.next())
                .await
                .context("timed out waiting for a frame")?;
            match message {
                None => return Ok(Frame::Closed(None)),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => return Ok(Frame::Json(serde_json::from_str(&text)?)),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Frame::Closed(frame.map(|f| u16::from(f.code))));
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Assert response status and parse JSON body
pub async fn assert_json<T: DeserializeOwned>(response: Response, expected_status: StatusCode) -> Result<T> {
    let status = response.status();
    if status != expected_status {
        let body = response.text().await?;
        bail!("Expected status {expected_status}, got {status}. Body: {body}");
    }
    Ok(response.json().await?)
}
