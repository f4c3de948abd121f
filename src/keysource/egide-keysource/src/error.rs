//! Key source error types.

use thiserror::Error;

/// Errors that can occur while fetching a master key.
#[derive(Debug, Error)]
pub enum KeySourceError {
    /// Service account credentials are missing or invalid.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    /// Key identifier is not a secret version resource name.
    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    /// The custody service rejected our identity or permissions.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested secret version does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Transport failure or unexpected status.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a body we could not understand.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The secret version holds no bytes.
    #[error("empty key material for {0}")]
    EmptyKey(String),
}
