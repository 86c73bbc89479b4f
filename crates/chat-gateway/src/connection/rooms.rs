//! Room membership outcomes

use thiserror::Error;

/// Effect of a join or leave on local membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    Joined,
    AlreadyMember,
    Left,
    NotMember,
}

impl RoomChange {
    /// Whether membership actually changed
    pub fn changed(self) -> bool {
        matches!(self, Self::Joined | Self::Left)
    }
}

/// Why a join request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Connection is registered to another user")]
    IdentityMismatch,

    #[error("Conversation ID required")]
    MissingConversationId,

    #[error("Connection is closed")]
    ConnectionClosed,
}
