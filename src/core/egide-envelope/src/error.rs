//! Envelope encryption error types.

use thiserror::Error;

/// Errors that can occur while sealing or opening a secret payload.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The OS random source failed.
    #[error("random source failure: {0}")]
    Randomness(String),

    /// Data key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The AEAD cipher could not be constructed or refused to seal.
    #[error("cipher construction failed: {0}")]
    CipherConstruction(String),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    PayloadFormat(String),

    /// Tag verification failed.
    ///
    /// Carries no detail on purpose: a wrong master key and a tampered
    /// payload are indistinguishable to the caller.
    #[error("message authentication failed")]
    Authentication,
}
