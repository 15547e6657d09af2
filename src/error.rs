//! Error types for relay-link.

use std::fmt;
use thiserror::Error;

/// Errors that can occur in registry and transport operations.
#[derive(Error, Debug)]
pub enum RelayLinkError {
    /// The caller supplied an empty or malformed endpoint. This is the only
    /// error the registry reports synchronously.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Transport-level failure. Surfaced asynchronously through the error
    /// callback of every subscriber on the affected connection.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A subscriber's own success-handling code failed. Converted into an
    /// error delivery to that same subscriber, never to its siblings.
    #[error("Callback failure: {0}")]
    CallbackFailure(String),

    /// Delivering an error to a subscriber failed as well. Logged and
    /// dropped; terminal for that one delivery attempt only.
    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    /// Invalid client configuration (bad URL scheme, missing runtime, ...).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An operation did not complete within its configured timeout.
    #[error("Timeout: {0}")]
    TimeoutError(String),
}

/// Result type for relay-link operations.
pub type Result<T> = std::result::Result<T, RelayLinkError>;

/// Failure raised by a subscriber's own handling code, carried across the
/// listener boundary as an explicit value rather than an unwind.
#[derive(Debug, Clone)]
pub struct CallbackError {
    /// Human-readable description of what the callback could not do.
    pub message: String,
}

impl CallbackError {
    /// Create a new callback error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
