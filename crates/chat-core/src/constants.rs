//! Shared names: broker topology, client event names and state-store keys

/// Broker exchanges
pub mod exchanges {
    /// Topic exchange carrying chat message lifecycle events
    pub const CHAT: &str = "chat.exchange";
    /// Topic exchange carrying presence transitions
    pub const PRESENCE: &str = "presence.exchange";
    /// Dead-letter exchange shared by every consumer queue
    pub const DEAD_LETTER: &str = "dlx.exchange";
}

/// Broker queues
pub mod queues {
    pub const MESSAGE_DELIVERY: &str = "message-delivery-queue";
    pub const PRESENCE_EVENTS: &str = "presence-events-queue";

    /// Dead-letter queue paired with a consumer queue
    pub fn dead_letter(queue: &str) -> String {
        format!("{queue}.dlq")
    }
}

/// Broker routing keys
pub mod routing_keys {
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const MESSAGE_CONFIRMED: &str = "message.confirmed";
    pub const MESSAGE_CREATE_ERROR: &str = "message.create.error";
    pub const MESSAGE_CREATE_REQUEST: &str = "message.create.request";
    pub const PRESENCE_ONLINE: &str = "presence.online";
    pub const PRESENCE_OFFLINE: &str = "presence.offline";
    pub const PRESENCE_ALL: &str = "presence.*";
}

/// `eventType` discriminator values carried in broker payloads
pub mod event_types {
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const MESSAGE_CONFIRMED: &str = "message.confirmed";
    pub const MESSAGE_CREATE_ERROR: &str = "message.create-error";
    pub const MESSAGE_CREATE_REQUEST: &str = "message.create-request";
    pub const PRESENCE_ONLINE: &str = "presence.online";
    pub const PRESENCE_OFFLINE: &str = "presence.offline";
}

/// Socket event names exchanged with clients
pub mod client_events {
    // Client -> server
    pub const CONVERSATION_JOIN: &str = "conversation:join";
    pub const CONVERSATION_LEAVE: &str = "conversation:leave";
    pub const MESSAGE_SEND: &str = "message:send";
    pub const PRESENCE_HEARTBEAT: &str = "presence:heartbeat";
    pub const TYPING_START: &str = "typing:start";
    pub const TYPING_STOP: &str = "typing:stop";

    // Server -> client
    pub const CONNECTION_SUCCESS: &str = "connection:success";
    pub const CONNECTION_ERROR: &str = "connection:error";
    pub const MESSAGE_NEW: &str = "message:new";
    pub const MESSAGE_CONFIRMED: &str = "message:confirmed";
    pub const MESSAGE_ERROR: &str = "message:error";
    pub const PRESENCE_UPDATE: &str = "presence:update";
    pub const TYPING_UPDATE: &str = "typing:update";
    pub const ACK: &str = "ack";
}

/// State-store key namespaces
pub mod keys {
    use crate::value_objects::{ConnectionId, UserId};

    /// Set of every user with at least one registered connection
    pub const ONLINE_USERS: &str = "users:online";
    /// Global live-connection counter
    pub const TOTAL_CONNECTIONS: &str = "total:connections";

    pub fn user_connections(user_id: &UserId) -> String {
        format!("user:{user_id}:connections")
    }

    pub fn connection(connection_id: &ConnectionId) -> String {
        format!("connection:{connection_id}")
    }

    pub fn server_connections(server_id: &str) -> String {
        format!("server:{server_id}:connections")
    }

    pub fn user_online(user_id: &UserId) -> String {
        format!("user:{user_id}:online")
    }

    pub fn user_last_seen(user_id: &UserId) -> String {
        format!("user:{user_id}:last_seen")
    }

    pub fn offline_inbox(user_id: &UserId) -> String {
        format!("offline:{user_id}")
    }
}

/// Room naming
pub mod rooms {
    const CONVERSATION_PREFIX: &str = "conversation:";

    pub fn conversation(conversation_id: &str) -> String {
        format!("{CONVERSATION_PREFIX}{conversation_id}")
    }
}

/// Default presence TTL in seconds
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 60;

/// Default bounded retry budget for consumers
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay carried on a re-delivered message (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

/// Consumer liveness lease; unacked deliveries of a silent consumer are reclaimed after it
pub const DEFAULT_CONSUMER_LEASE_TTL_MS: u64 = 30_000;

/// Default in-flight messages per consumer
pub const DEFAULT_PREFETCH: usize = 5;
