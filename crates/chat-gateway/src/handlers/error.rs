//! Handler error types

use chat_core::EmitError;
use chat_queue::BrokerError;
use chat_service::ServiceError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::connection::JoinRejection;
use crate::protocol::first_validation_message;

/// Handler error type
#[derive(Debug, Error)]
pub enum HandlerError {
    /// `data` did not decode into the expected body
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    /// The socket has no registry record
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The registry record belongs to another user
    #[error("User identity mismatch")]
    IdentityMismatch,

    #[error(transparent)]
    JoinRejected(#[from] JoinRejection),

    /// Typing event for a room the socket never joined
    #[error("Not a member of {0}")]
    NotInRoom(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The create request could not be queued
    #[error("Failed to queue message: {0}")]
    Publish(#[from] BrokerError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl HandlerError {
    /// Text put in the `error` field of a failed acknowledgement
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidPayload(_) => "Invalid payload".to_string(),
            Self::Validation(errors) => first_validation_message(errors),
            Self::NotAuthenticated => "Not authenticated".to_string(),
            Self::IdentityMismatch => "User identity mismatch".to_string(),
            Self::JoinRejected(rejection) => rejection.to_string(),
            Self::NotInRoom(_) => "Not in conversation".to_string(),
            Self::UnknownEvent(event) => format!("Unknown event: {event}"),
            Self::Publish(_) => "Failed to queue message".to_string(),
            Self::Service(_) | Self::Emit(_) => "Internal error".to_string(),
        }
    }

    /// Client mistakes are logged quieter than infrastructure failures
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Service(_) | Self::Publish(_) | Self::Emit(_))
    }
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConversationRequest;
    use validator::Validate;

    #[test]
    fn test_validation_message_reaches_client() {
        let errors = ConversationRequest::default().validate().unwrap_err();
        let err = HandlerError::from(errors);
        assert_eq!(err.client_message(), "Conversation ID required");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_infrastructure_errors_are_hidden() {
        let err = HandlerError::from(BrokerError::Unavailable("down".into()));
        assert_eq!(err.client_message(), "Failed to queue message");
        assert!(!err.is_client_error());
    }
}
