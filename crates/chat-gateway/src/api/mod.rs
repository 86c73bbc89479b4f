//! HTTP surface beside the socket endpoint: operator stats and probes

pub mod admin;
pub mod health;
mod response;

pub use response::{ApiError, ApiResult, ErrorBody, ErrorDetail};

use axum::{routing::get, Router};

use crate::server::GatewayState;

/// `/admin/*` and `/health/*` routes
pub fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/admin/stats", get(admin::stats))
        .route("/admin/connections", get(admin::total_connections))
        .route(
            "/admin/connections/server/:server_id",
            get(admin::server_connections),
        )
        .route(
            "/admin/connections/user/:user_id",
            get(admin::user_connections),
        )
        .route("/admin/users/online", get(admin::online_users))
        .route("/admin/health", get(admin::health))
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/health/startup", get(health::startup))
}
