//! Connection entity - one live socket session owned by one gateway instance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::value_objects::{ConnectionId, UserId};

/// Hash field names used when a connection is persisted in the state store
pub mod fields {
    pub const CONNECTION_ID: &str = "connectionId";
    pub const USER_ID: &str = "userId";
    pub const SERVER_ID: &str = "serverId";
    pub const CONNECTED_AT: &str = "connectedAt";
    pub const USER_AGENT: &str = "userAgent";
    pub const IP: &str = "ip";
}

/// Client details captured during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl ClientInfo {
    pub fn new(user_agent: Option<String>, ip: Option<String>) -> Self {
        Self { user_agent, ip }
    }
}

/// Registered connection metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    /// Instance that accepted the socket; never changes
    pub server_id: String,
    pub connected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ConnectionMetadata {
    pub fn new(
        connection_id: ConnectionId,
        user_id: UserId,
        server_id: impl Into<String>,
        connected_at: DateTime<Utc>,
        info: ClientInfo,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            server_id: server_id.into(),
            connected_at,
            user_agent: info.user_agent,
            ip: info.ip,
        }
    }

    /// Flatten into hash fields for storage
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (fields::CONNECTION_ID.to_string(), self.connection_id.to_string()),
            (fields::USER_ID.to_string(), self.user_id.to_string()),
            (fields::SERVER_ID.to_string(), self.server_id.clone()),
            (fields::CONNECTED_AT.to_string(), self.connected_at.to_rfc3339()),
        ];
        if let Some(ua) = &self.user_agent {
            out.push((fields::USER_AGENT.to_string(), ua.clone()));
        }
        if let Some(ip) = &self.ip {
            out.push((fields::IP.to_string(), ip.clone()));
        }
        out
    }

    /// Rebuild from stored hash fields.
    ///
    /// Returns `None` when the hash is empty or lacks the owning user/server,
    /// which the registry treats as "not registered".
    pub fn from_fields(connection_id: &ConnectionId, map: &HashMap<String, String>) -> Option<Self> {
        let user_id = map.get(fields::USER_ID).filter(|v| !v.is_empty())?;
        let server_id = map.get(fields::SERVER_ID).filter(|v| !v.is_empty())?;
        let connected_at = map
            .get(fields::CONNECTED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|v| v.with_timezone(&Utc))
            .unwrap_or_default();

        Some(Self {
            connection_id: connection_id.clone(),
            user_id: UserId::new(user_id.clone()),
            server_id: server_id.clone(),
            connected_at,
            user_agent: map.get(fields::USER_AGENT).cloned(),
            ip: map.get(fields::IP).cloned(),
        })
    }
}

/// Registry-wide counters as seen from one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub server_id: String,
    pub total_connections: i64,
    pub online_users: u64,
    pub current_server_connections: u64,
    pub timestamp: DateTime<Utc>,
}

/// Result of unregistering a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// No metadata existed; nothing was changed
    NotFound,
    /// The connection was removed; `remaining` counts the user's other connections
    Removed { user_id: UserId, remaining: u64 },
}

impl UnregisterOutcome {
    /// True when this removal took the user's last connection
    pub fn was_last_connection(&self) -> bool {
        matches!(self, Self::Removed { remaining: 0, .. })
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::NotFound => None,
            Self::Removed { user_id, .. } => Some(user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ConnectionMetadata {
        ConnectionMetadata::new(
            ConnectionId::new("c1"),
            UserId::new("u1"),
            "s1",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ClientInfo::new(Some("test-agent".into()), None),
        )
    }

    #[test]
    fn test_fields_rebuild_metadata() {
        let meta = sample();
        let map: HashMap<String, String> = meta.to_fields().into_iter().collect();
        assert!(!map.contains_key(fields::IP));

        let rebuilt = ConnectionMetadata::from_fields(&meta.connection_id, &map).unwrap();
        assert_eq!(rebuilt, meta);
    }

    #[test]
    fn test_missing_user_is_not_registered() {
        let mut map = HashMap::new();
        map.insert(fields::SERVER_ID.to_string(), "s1".to_string());
        assert!(ConnectionMetadata::from_fields(&ConnectionId::new("c1"), &map).is_none());
        assert!(ConnectionMetadata::from_fields(&ConnectionId::new("c1"), &HashMap::new()).is_none());
    }

    #[test]
    fn test_last_connection() {
        let last = UnregisterOutcome::Removed {
            user_id: UserId::new("u1"),
            remaining: 0,
        };
        assert!(last.was_last_connection());
        assert!(!UnregisterOutcome::NotFound.was_last_connection());
        assert!(!UnregisterOutcome::Removed {
            user_id: UserId::new("u1"),
            remaining: 2
        }
        .was_last_connection());
    }

    #[test]
    fn test_metadata_json_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["serverId"], "s1");
        assert_eq!(json["userAgent"], "test-agent");
        assert!(json.get("ip").is_none());
    }
}
