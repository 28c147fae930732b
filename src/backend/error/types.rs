/**
 * Backend Error Types
 *
 * This module defines the errors returned by every `Backend` call. They are
 * scoped to the operation that failed; none of them is fatal to the process.
 *
 * # Error Categories
 *
 * ## Transport
 *
 * - Network failures before a response arrived
 * - Per-request timeouts
 *
 * ## Backend Refusals
 *
 * - Missing or expired session
 * - Row-level security rejections
 * - Missing rows and unique-constraint conflicts
 * - Any other non-success status, with its body
 *
 * ## Realtime
 *
 * - A subscription that ended and will not reconnect
 */

use crate::shared::SharedError;
use thiserror::Error;

/// Result alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend-specific error types
///
/// # Usage
///
/// ```rust
/// use shadowchat::backend::error::BackendError;
///
/// let err = BackendError::forbidden("only the sender may delete a message");
/// assert!(!err.is_retryable());
///
/// let err = BackendError::network("connection reset");
/// assert!(err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request could not be delivered or the connection broke
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message
        message: String,
    },

    /// The request did not complete within the configured timeout
    #[error("Request timed out: {operation}")]
    Timeout {
        /// What was being attempted
        operation: String,
    },

    /// Unexpected HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// No session, or the backend rejected the token
    #[error("Not authenticated")]
    Unauthenticated,

    /// Row-level security refused the operation
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Human-readable error message
        message: String,
    },

    /// The requested row does not exist (or is not visible to the caller)
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing row
        what: String,
    },

    /// A unique constraint was violated
    #[error("Conflict: {message}")]
    Conflict {
        /// Human-readable error message
        message: String,
    },

    /// A realtime subscription ended and will not reconnect
    #[error("Subscription closed: {label}")]
    SubscriptionClosed {
        /// Subscription label, e.g. `messages`
        label: String,
    },

    /// Shared error (validation or payload decoding)
    #[error(transparent)]
    SharedError(#[from] SharedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BackendError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a new HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a new forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a new conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Whether repeating the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// HTTP status code equivalent, when there is one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthenticated => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::Timeout { .. } => Some(408),
            _ => None,
        }
    }
}
