//! Gateway server setup
//!
//! Router, background tasks (broadcaster and consumers) and the serve loop
//! with graceful shutdown.

mod middleware;
mod socket;
mod state;

pub use middleware::{apply_middleware, REQUEST_ID_HEADER};
pub use socket::{ws_handler, ConnectParams};
pub use state::{GatewayState, Infrastructure};

#[cfg(test)]
pub(crate) use state::test_support;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::get, Router};
use chat_common::{AppConfig, AppError};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::consumers::start_consumers;
use crate::protocol::CloseCode;

/// How long shutdown waits for sockets to run their disconnect path
const SOCKET_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .merge(crate::api::routes())
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    let is_production = state.config().app.env.is_production();
    let router = apply_middleware(create_router(), &state.config().cors, is_production);
    router.with_state(state)
}

/// Background tasks of a running gateway
pub struct GatewayRuntime {
    state: GatewayState,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayRuntime {
    /// Start the broadcaster, declare broker topology and start consumers
    pub async fn start(state: GatewayState) -> Result<Self, AppError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![state.broadcaster().clone().start(shutdown_rx.clone())];

        match start_consumers(&state, &shutdown_rx).await {
            Ok(consumers) => tasks.extend(consumers),
            Err(e) => {
                let _ = shutdown_tx.send(true);
                return Err(e);
            }
        }

        state.mark_started();
        tracing::info!(server_id = %state.server_id(), "Gateway runtime started");
        Ok(Self {
            state,
            shutdown_tx,
            tasks,
        })
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Stop consumers and the broadcaster, then the pub/sub subscriber.
    /// In-flight deliveries finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.state.infra().bus.shutdown().await;
        tracing::info!("Gateway runtime stopped");
    }
}

impl std::fmt::Debug for GatewayRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRuntime")
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Serve HTTP and WebSocket traffic until `shutdown` resolves, then close
/// every local socket with `GoingAway`
pub async fn serve<F>(listener: TcpListener, state: GatewayState, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let connections = state.connections().clone();
    let app = create_app(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        let closed = connections.close_all(CloseCode::GoingAway);
        tracing::info!(closed, "Shutting down, sockets asked to close");
    })
    .await
    .map_err(|e| AppError::internal(anyhow::anyhow!("Server error: {e}")))
}

/// Wait until local sockets have unregistered, bounded by `timeout`
async fn drain_sockets(state: &GatewayState, timeout: Duration) {
    let connections = state.connections();
    let drained = tokio::time::timeout(timeout, async {
        while connections.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = connections.connection_count(),
            "Sockets still open after shutdown grace period"
        );
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Run the complete gateway server with configuration
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = config.gateway.address();

    let infra = Infrastructure::connect(&config).await?;
    let state = GatewayState::new(config, infra);
    let runtime = GatewayRuntime::start(state.clone()).await?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Gateway listening on ws://{}/ws", addr);

    let served = serve(listener, state.clone(), shutdown_signal()).await;

    drain_sockets(&state, SOCKET_DRAIN_TIMEOUT).await;
    runtime.shutdown().await;
    served
}
