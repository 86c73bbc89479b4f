//! Errors surfaced through the domain ports

use thiserror::Error;

/// Failure of a shared state store operation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("State store command failed: {0}")]
    Command(String),

    #[error("Wrong value type stored at {key}")]
    WrongType { key: String },

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// True when retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::Command(_) => "STORE_COMMAND_FAILED",
            Self::WrongType { .. } => "STORE_WRONG_TYPE",
            Self::Corrupt { .. } => "STORE_CORRUPT_VALUE",
        }
    }
}

/// Failure of the cross-instance emit primitive
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Broadcast transport failed: {0}")]
    Transport(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
