//! Plugin error types.

use thiserror::Error;
use tonic::Status;

use egide_envelope::EnvelopeError;
use egide_keysource::KeySourceError;

use crate::lifecycle::ServiceState;

/// Errors that can occur in the KMS plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Invalid startup configuration. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Master key could not be fetched. Fails the current request only.
    #[error("key source error: {0}")]
    KeySource(#[from] KeySourceError),

    /// Sealing or opening a payload failed. Fails the current request only.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Listener bind or accept failure. Fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// A lifecycle transition was attempted out of order.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: ServiceState,
        /// Requested state.
        to: ServiceState,
    },
}

impl From<PluginError> for Status {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::KeySource(_) => Status::unavailable("failed to retrieve master key"),
            PluginError::Envelope(EnvelopeError::PayloadFormat(_)) => {
                Status::invalid_argument("malformed ciphertext payload")
            },
            // Same message for a wrong key and a tampered payload.
            PluginError::Envelope(EnvelopeError::Authentication) => {
                Status::invalid_argument("decryption failed")
            },
            PluginError::Envelope(_) => Status::internal("encryption failure"),
            PluginError::Configuration(_)
            | PluginError::Transport(_)
            | PluginError::InvalidTransition { .. } => Status::internal("plugin unavailable"),
        }
    }
}
