//! Probe endpoints
//!
//! Readiness and startup go through the state store, so an unreachable
//! Redis turns them into 503.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use chat_core::ConnectionStats;

use crate::server::GatewayState;

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /health/liveness
pub async fn liveness(State(state): State<GatewayState>) -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        timestamp: state.clock().now(),
    })
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub redis: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ConnectionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// GET /health/readiness
pub async fn readiness(State(state): State<GatewayState>) -> (StatusCode, Json<Readiness>) {
    let timestamp = state.clock().now();
    match state.registry().get_stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                redis: "connected",
                stats: Some(stats),
                error: None,
                timestamp,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "not_ready",
                    redis: "disconnected",
                    stats: None,
                    error: Some(e.to_string()),
                    timestamp,
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Startup {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /health/startup
pub async fn startup(State(state): State<GatewayState>) -> (StatusCode, Json<Startup>) {
    let reachable = state.registry().get_stats().await.is_ok();
    let (status, label) = if reachable && state.is_started() {
        (StatusCode::OK, "started")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };
    (
        status,
        Json(Startup {
            status: label,
            timestamp: state.clock().now(),
        }),
    )
}
