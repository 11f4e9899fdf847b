//! Common error types for SyncBridge.

use thiserror::Error;

/// Top-level error type for SyncBridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure talking to the backend.
    #[error("Network error: {0}")]
    Network(String),

    /// An operation did not settle within its time bound.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No session, or the backend rejected the identity token.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The backend answered with a non-success status.
    #[error("Remote error {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Backend error code from the response body, if any.
        code: Option<String>,
        /// Response body or message.
        message: String,
    },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local mutation queue failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Sync engine collaborator failed.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Backend error code carried by a remote rejection.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Error::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of a remote rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
