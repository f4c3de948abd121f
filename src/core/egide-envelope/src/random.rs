//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG for every salt, nonce and key
//! overwrite. Unlike a panicking `fill_bytes`, failures are reported so that
//! a broken entropy source turns into a failed request instead of a crash.

use rand::{rngs::OsRng, RngCore};

use crate::aead::NONCE_SIZE;
use crate::error::EnvelopeError;
use crate::payload::SALT_SIZE;

/// Fills `buf` with random bytes from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), EnvelopeError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| EnvelopeError::Randomness(e.to_string()))
}

/// Generates a fresh 16-byte key derivation salt.
pub fn generate_salt() -> Result<[u8; SALT_SIZE], EnvelopeError> {
    let mut salt = [0u8; SALT_SIZE];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Generates a fresh 12-byte AEAD nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_SIZE], EnvelopeError> {
    let mut nonce = [0u8; NONCE_SIZE];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

/// Generates `len` random bytes.
pub fn generate_bytes(len: usize) -> Result<Vec<u8>, EnvelopeError> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes)?;
    Ok(bytes)
}
