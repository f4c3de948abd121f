//! # Egide Envelope
//!
//! Envelope encryption engine for the Egide KMS plugin.
//!
//! Every payload is sealed with an ephemeral data key derived from the
//! master key and a fresh random salt:
//!
//! ```text
//! DEK        = HMAC-SHA256(master_key, salt)
//! ciphertext = AEAD(DEK).seal(nonce, plaintext)
//! payload    = {"s": salt, "n": nonce, "c": ciphertext}
//! ```
//!
//! The AEAD is AES-256-GCM on hosts with hardware AES support and
//! ChaCha20-Poly1305 elsewhere. Both use a 12-byte nonce and a 16-byte tag,
//! so payloads have the same shape whichever cipher produced them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod payload;
pub mod random;

pub use aead::AeadAlgorithm;
pub use cipher::EnvelopeCipher;
pub use error::EnvelopeError;
pub use keys::{DataKey, MasterKey};
pub use payload::SecretPayload;
