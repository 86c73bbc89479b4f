//! Presence transitions carried on the presence exchange

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::routing_keys;
use crate::entities::PresenceStatus;
use crate::value_objects::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum PresenceEvent {
    #[serde(rename = "presence.online")]
    Online(PresenceChange),

    #[serde(rename = "presence.offline")]
    Offline(PresenceChange),
}

/// Body shared by both presence events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: UserId,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Instance that observed the transition
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
}

impl PresenceEvent {
    pub fn change(&self) -> &PresenceChange {
        match self {
            Self::Online(c) | Self::Offline(c) => c,
        }
    }

    pub fn status(&self) -> PresenceStatus {
        match self {
            Self::Online(_) => PresenceStatus::Online,
            Self::Offline(_) => PresenceStatus::Offline,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Online(_) => routing_keys::PRESENCE_ONLINE,
            Self::Offline(_) => routing_keys::PRESENCE_OFFLINE,
        }
    }
}
