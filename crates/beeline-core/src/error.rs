//! Unified error types for all layers of the queue.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type QueueResult<T> = Result<T, QueueError>;

/// Unified error type for all layers of Beeline.
///
/// An empty lease result is data (`None`), never an error: workers polling
/// an idle queue is the normal case, and only genuine faults surface here.
#[derive(Error, Debug)]
pub enum QueueError {
    // ============ Domain Errors ============
    /// Job not found
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Lease conflict: the presented token does not own a live lease
    #[error("Lease conflict: {0}")]
    Conflict(String),

    // ============ Authentication Errors ============
    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ============ Infrastructure Errors ============
    /// Store error: a read or conditional transition could not execute
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ Internal Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QueueError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::Unauthorized(_) => 401,
            Self::Store(_)
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Store(_) => "STORE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a job id.
    #[must_use]
    pub fn not_found<T: ToString>(id: T) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a lease conflict error.
    #[must_use]
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a store error.
    #[must_use]
    pub fn store<T: Into<String>>(message: T) -> Self {
        Self::Store(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    ///
    /// Only transient store faults qualify; domain outcomes such as
    /// conflicts are final for the lease that observed them.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Store(format!("connection pool error: {}", err))
    }
}

/// Serializable error response for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `QueueError`.
    #[must_use]
    pub fn from_error(error: &QueueError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<&QueueError> for ErrorResponse {
    fn from(error: &QueueError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(QueueError::not_found("j-1").status_code(), 404);
        assert_eq!(QueueError::validation("missing type").status_code(), 400);
        assert_eq!(QueueError::conflict("token mismatch").status_code(), 409);
        assert_eq!(QueueError::unauthorized("no token").status_code(), 401);
        assert_eq!(QueueError::store("redis down").status_code(), 500);
        assert_eq!(QueueError::internal("oops").status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(QueueError::not_found("j-1").error_code(), "NOT_FOUND");
        assert_eq!(QueueError::validation("bad input").error_code(), "VALIDATION_ERROR");
        assert_eq!(QueueError::conflict("taken").error_code(), "CONFLICT");
        assert_eq!(QueueError::unauthorized("no auth").error_code(), "UNAUTHORIZED");
        assert_eq!(QueueError::store("down").error_code(), "STORE_ERROR");
        assert_eq!(QueueError::internal("err").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(QueueError::store("connection lost").is_retriable());
        assert!(!QueueError::not_found("j-1").is_retriable());
        assert!(!QueueError::conflict("taken").is_retriable());
        assert!(!QueueError::validation("bad input").is_retriable());
    }

    #[test]
    fn test_error_constructors() {
        let not_found = QueueError::not_found("j-42");
        assert!(not_found.to_string().contains("j-42"));

        let validation = QueueError::validation("missing job type");
        assert!(validation.to_string().contains("missing job type"));

        let conflict = QueueError::conflict("lease owned by another worker");
        assert!(conflict.to_string().contains("another worker"));

        let store = QueueError::store("timeout");
        assert!(store.to_string().contains("timeout"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let queue_err: QueueError = err.into();
        assert_eq!(queue_err.error_code(), "SERIALIZATION_ERROR");
        assert_eq!(queue_err.status_code(), 500);
    }

    #[test]
    fn test_error_response_from_error() {
        let err = QueueError::not_found("j-1");
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.code, "NOT_FOUND");
        assert!(!response.message.is_empty());
    }

    #[test]
    fn test_error_response_from_ref() {
        let err = QueueError::conflict("job re-leased");
        let response: ErrorResponse = ErrorResponse::from(&err);
        assert_eq!(response.code, "CONFLICT");
    }
}
