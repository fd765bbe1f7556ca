//! Error types for the engine.

use cookiesync_protocol::ProtocolError;
use cookiesync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or unusable endpoint, token or secret.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success HTTP status.
    #[error("remote error {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Malformed or unexpected response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted bucket does not have the expected shape.
    #[error("corrupted state: {0}")]
    Corrupted(String),

    /// The host cookie store or silent loader failed.
    #[error("host error: {0}")]
    Host(String),

    /// The caller supplied an invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The addressed cookie does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service loop is no longer running.
    #[error("service stopped")]
    ServiceStopped,
}

impl SyncError {
    /// Returns true if a failed push should be attempted again later.
    ///
    /// Network, HTTP status, response body and storage failures are
    /// retried. Failures only the user can resolve are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SyncError::Configuration(_)
                | SyncError::InvalidRequest(_)
                | SyncError::NotFound(_)
                | SyncError::ServiceStopped
        )
    }

    /// Returns true if this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::InvalidRequest(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Corrupted(err.to_string())
    }
}
