//! Sync error handling

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while talking to the sync server
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure before a response arrived
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,

    /// Credential rejected (401) or redirected to a login page
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Server refused the request as malformed (4xx)
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server failed (5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Sync is not configured (no URL or credential)
    #[error("Sync is not configured: {0}")]
    NotConfigured(String),

    /// Local store failed while applying sync results
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { .. } => true,
            _ => false,
        }
    }

    /// Whether the credential must be replaced before syncing again
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_connect() || err.is_request() {
            SyncError::transport_retryable(err.to_string())
        } else if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else {
            SyncError::transport_fatal(err.to_string())
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
