//! Read-only operator endpoints over the connection registry

use axum::{
    extract::{Path, State},
    Json,
};
use chat_core::{ConnectionId, ConnectionStats, UserId};
use serde::Serialize;

use super::response::ApiResult;
use crate::server::GatewayState;

/// GET /admin/stats
pub async fn stats(State(state): State<GatewayState>) -> ApiResult<Json<ConnectionStats>> {
    Ok(Json(state.registry().get_stats().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalConnections {
    pub total_connections: i64,
}

/// GET /admin/connections
pub async fn total_connections(
    State(state): State<GatewayState>,
) -> ApiResult<Json<TotalConnections>> {
    let total_connections = state.registry().get_total_connections().await?;
    Ok(Json(TotalConnections { total_connections }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConnections {
    pub server_id: String,
    pub connections: usize,
}

/// GET /admin/connections/server/{serverId}
pub async fn server_connections(
    State(state): State<GatewayState>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<ServerConnections>> {
    let connections = state.registry().get_server_connections(&server_id).await?.len();
    Ok(Json(ServerConnections {
        server_id,
        connections,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnections {
    pub user_id: UserId,
    pub is_online: bool,
    pub connections: Vec<ConnectionId>,
    pub connection_count: usize,
}

/// GET /admin/connections/user/{userId}
pub async fn user_connections(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserConnections>> {
    let user_id = UserId::new(user_id);
    let connections = state.registry().get_connections(&user_id).await?;
    let is_online = state.registry().is_online(&user_id).await?;

    Ok(Json(UserConnections {
        connection_count: connections.len(),
        user_id,
        is_online,
        connections,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    pub online_users: Vec<UserId>,
    pub count: usize,
}

/// GET /admin/users/online
pub async fn online_users(State(state): State<GatewayState>) -> ApiResult<Json<OnlineUsers>> {
    let mut online_users = state.registry().get_online_users().await?;
    online_users.sort();
    Ok(Json(OnlineUsers {
        count: online_users.len(),
        online_users,
    }))
}

#[derive(Debug, Serialize)]
pub struct AdminHealth {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: ConnectionStats,
}

/// GET /admin/health
pub async fn health(State(state): State<GatewayState>) -> ApiResult<Json<AdminHealth>> {
    let stats = state.registry().get_stats().await?;
    Ok(Json(AdminHealth {
        status: "healthy",
        stats,
    }))
}
