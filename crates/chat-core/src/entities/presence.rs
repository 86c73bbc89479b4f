//! Presence entity - derived online/offline state of a user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// Online status as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Presence snapshot for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserPresence {
    pub fn status(&self) -> PresenceStatus {
        PresenceStatus::from_online(self.online)
    }
}

/// What a presence write did to the user's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// OFFLINE -> ONLINE
    CameOnline,
    /// ONLINE -> ONLINE (TTL refreshed)
    Refreshed,
    /// ONLINE -> OFFLINE
    WentOffline,
    /// OFFLINE -> OFFLINE (lastSeen stamped only)
    AlreadyOffline,
}

impl PresenceTransition {
    /// True when the online flag flipped
    pub fn is_change(&self) -> bool {
        matches!(self, Self::CameOnline | Self::WentOffline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Online).unwrap(),
            "\"online\""
        );
        assert_eq!(PresenceStatus::from_online(false), PresenceStatus::Offline);
    }

    #[test]
    fn test_transition_change() {
        assert!(PresenceTransition::CameOnline.is_change());
        assert!(PresenceTransition::WentOffline.is_change());
        assert!(!PresenceTransition::Refreshed.is_change());
        assert!(!PresenceTransition::AlreadyOffline.is_change());
    }
}
