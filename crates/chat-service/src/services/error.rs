//! Service layer error types
//!
//! Provides a unified error type for registry, presence and delivery operations.

use chat_common::AppError;
use chat_core::{EmitError, StoreError};
use chat_queue::{BrokerError, ProcessError};
use thiserror::Error;

/// Service layer error type
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Shared state store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Broker failure
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Cross-instance emit failure
    #[error(transparent)]
    Emit(#[from] EmitError),

    /// Resource not found
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Create a not found error
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Infrastructure hiccup that a later attempt may get past
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Broker(e) => e.is_transient(),
            Self::Emit(EmitError::Transport(_)) => true,
            _ => false,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            _ if self.is_transient() => 503,
            _ => 500,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            _ if self.is_transient() => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::Store(e),
            ServiceError::Broker(e) if e.is_transient() => AppError::Unavailable(e.to_string()),
            ServiceError::Broker(e) => AppError::Broker(e.to_string()),
            ServiceError::Emit(e) => AppError::Unavailable(e.to_string()),
            ServiceError::NotFound { resource, id } => {
                AppError::NotFound(format!("{resource} {id}"))
            }
            ServiceError::Validation(msg) => AppError::Validation(msg),
            ServiceError::Internal(msg) => AppError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl From<ServiceError> for ProcessError {
    fn from(err: ServiceError) -> Self {
        ProcessError::handler(err)
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
