//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An identity key does not have the `name|domain|path` shape.
    #[error("invalid identity key: {0}")]
    InvalidIdentityKey(String),

    /// A backup document lacks a required field.
    #[error("backup is missing required field: {0}")]
    MissingBackupField(&'static str),
}
