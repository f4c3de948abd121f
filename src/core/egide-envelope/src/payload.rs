//! Secret payload framing.
//!
//! A payload is a JSON object with three base64 (standard alphabet, padded)
//! fields:
//!
//! ```json
//! {"s":"<salt, 16 bytes>","n":"<nonce, 12 bytes>","c":"<ciphertext || tag>"}
//! ```
//!
//! This layout is shared with payloads already persisted by the API server,
//! so field names, order and encoding must not change.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::error::EnvelopeError;

/// Size of the key derivation salt in bytes.
pub const SALT_SIZE: usize = 16;

#[derive(Serialize, Deserialize)]
struct WirePayload {
    s: String,
    n: String,
    c: String,
}

/// One sealed secret: salt, nonce and authenticated ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPayload {
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl SecretPayload {
    /// Assembles a payload from its parts.
    pub fn new(salt: [u8; SALT_SIZE], nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            salt,
            nonce,
            ciphertext,
        }
    }

    /// Key derivation salt.
    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    /// AEAD nonce.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext with trailing authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serializes the payload to its wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let wire = WirePayload {
            s: BASE64.encode(self.salt),
            n: BASE64.encode(self.nonce),
            c: BASE64.encode(&self.ciphertext),
        };

        serde_json::to_vec(&wire).map_err(|e| EnvelopeError::PayloadFormat(e.to_string()))
    }

    /// Parses a payload from its wire encoding.
    ///
    /// Rejects missing or null fields, invalid base64, a salt or nonce of the
    /// wrong size, and a ciphertext too short to hold a tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WirePayload = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::PayloadFormat(e.to_string()))?;

        let salt = decode_field("s", &wire.s)?;
        let nonce = decode_field("n", &wire.n)?;
        let ciphertext = decode_field("c", &wire.c)?;

        let salt: [u8; SALT_SIZE] = salt.try_into().map_err(|v: Vec<u8>| {
            EnvelopeError::PayloadFormat(format!(
                "salt must be {} bytes, got {}",
                SALT_SIZE,
                v.len()
            ))
        })?;

        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|v: Vec<u8>| {
            EnvelopeError::PayloadFormat(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                v.len()
            ))
        })?;

        if ciphertext.len() < TAG_SIZE {
            return Err(EnvelopeError::PayloadFormat(
                "ciphertext too short".to_string(),
            ));
        }

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64
        .decode(value)
        .map_err(|e| EnvelopeError::PayloadFormat(format!("field {name:?}: {e}")))
}
