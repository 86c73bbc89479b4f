//! WebSocket close codes
//!
//! Standard codes for orderly shutdown plus gateway-specific codes in the
//! 4000 range.

use serde::{Deserialize, Serialize};

/// Gateway WebSocket close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure
    Normal = 1000,
    /// The instance is shutting down
    GoingAway = 1001,
    /// Handshake token missing or invalid
    AuthenticationFailed = 4001,
    /// No client frame within the idle timeout
    IdleTimeout = 4002,
    /// The connection could not be recorded in the registry
    RegistrationFailed = 4003,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            4001 => Some(Self::AuthenticationFailed),
            4002 => Some(Self::IdleTimeout),
            4003 => Some(Self::RegistrationFailed),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether a client should reconnect after this close code
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        !matches!(self, Self::AuthenticationFailed)
    }

    /// Reason text sent in the close frame
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Server shutting down",
            Self::AuthenticationFailed => "Authentication failed",
            Self::IdleTimeout => "Idle timeout",
            Self::RegistrationFailed => "Registration failed",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
