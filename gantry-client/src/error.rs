//! Error types for the Gantry queue client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the queue service
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Queue returned an error status code
    #[error("queue error (status {status}): {message}")]
    QueueError {
        /// HTTP status code
        status: u16,
        /// Error message from the queue
        message: String,
    },

    /// Failed to parse a response body
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Create a queue error from status code and message
    pub fn queue_error(status: u16, message: impl Into<String>) -> Self {
        Self::QueueError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::QueueError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::QueueError { status, .. } if *status >= 500)
    }
}
