//! Error taxonomy for collaboration sessions.

use thiserror::Error;

/// Collaboration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollabError {
    /// The join handshake came back with a non-success status.
    #[error("Unable to connect: {status}")]
    JoinRejected { status: u16 },
    /// An encoded update could not be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// A request or the push stream failed.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Not connected to a session")]
    NotConnected,
    #[error("Session channel already joined")]
    AlreadyJoined,
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

/// Result type for collaboration operations.
pub type CollabResult<T> = Result<T, CollabError>;

impl From<reqwest::Error> for CollabError {
    fn from(e: reqwest::Error) -> Self {
        CollabError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for CollabError {
    fn from(e: url::ParseError) -> Self {
        CollabError::InvalidUrl(e.to_string())
    }
}
