//! Broker and consumer errors.

use chat_cache::RedisPoolError;
use thiserror::Error;

/// Errors raised by a `BrokerChannel`
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker command failed: {0}")]
    Command(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Corrupt message in {queue}: {reason}")]
    Corrupt { queue: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<RedisPoolError> for BrokerError {
    fn from(err: RedisPoolError) -> Self {
        if err.is_connection_error() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Failure reported by a message handler; always routed through retry
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid message body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),
}

impl ProcessError {
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }
}

/// Errors that stop a consumer from starting
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to initialize consumer for {queue}: {source}")]
    Initialize {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Unavailable("down".into()).is_transient());
        assert!(!BrokerError::QueueNotFound("q".into()).is_transient());
        assert!(!BrokerError::Command("ERR".into()).is_transient());
    }

    #[test]
    fn test_process_error_display() {
        let err = ProcessError::handler("downstream timeout");
        assert_eq!(err.to_string(), "downstream timeout");

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(ProcessError::from(parse).to_string().starts_with("Invalid message body"));
    }
}
