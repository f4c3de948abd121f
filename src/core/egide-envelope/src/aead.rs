//! AEAD cipher selection.
//!
//! Two interchangeable 256-bit ciphers are supported. AES-256-GCM is used
//! when the host has hardware AES; ChaCha20-Poly1305 is the constant-time
//! software fallback. Both take a 12-byte nonce and append a 16-byte tag.

use std::str::FromStr;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use chacha20poly1305::ChaCha20Poly1305;
use zeroize::Zeroizing;

use crate::error::EnvelopeError;
use crate::keys::DataKey;

/// Size of a data key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AEAD nonce in bytes (both ciphers).
pub const NONCE_SIZE: usize = 12;

/// Size of the AEAD authentication tag in bytes (both ciphers).
pub const TAG_SIZE: usize = 16;

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-256-GCM (hardware accelerated hosts).
    Aes256Gcm,
    /// ChaCha20-Poly1305 (hosts without AES instructions).
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Picks the cipher for this host: AES-256-GCM when AES is accelerated.
    pub fn preferred() -> Self {
        if has_native_aes() {
            Self::Aes256Gcm
        } else {
            Self::ChaCha20Poly1305
        }
    }

    /// The other supported algorithm.
    pub fn alternate(self) -> Self {
        match self {
            Self::Aes256Gcm => Self::ChaCha20Poly1305,
            Self::ChaCha20Poly1305 => Self::Aes256Gcm,
        }
    }

    /// Encrypts `plaintext`, returning `ciphertext || tag`.
    pub fn seal(
        self,
        key: &DataKey,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let sealed = match self {
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| EnvelopeError::CipherConstruction(e.to_string()))?
                .encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext),
            Self::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| EnvelopeError::CipherConstruction(e.to_string()))?
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext),
        };

        sealed.map_err(|e| EnvelopeError::CipherConstruction(e.to_string()))
    }

    /// Verifies and decrypts `ciphertext || tag`.
    ///
    /// Any tag mismatch or truncation yields [`EnvelopeError::Authentication`]
    /// and no plaintext.
    pub fn open(
        self,
        key: &DataKey,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
        let opened = match self {
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| EnvelopeError::CipherConstruction(e.to_string()))?
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext),
            Self::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| EnvelopeError::CipherConstruction(e.to_string()))?
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext),
        };

        opened
            .map(Zeroizing::new)
            .map_err(|_| EnvelopeError::Authentication)
    }
}

impl std::fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes256Gcm => write!(f, "aes256-gcm"),
            Self::ChaCha20Poly1305 => write!(f, "chacha20-poly1305"),
        }
    }
}

impl FromStr for AeadAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            _ => Err(format!("unsupported cipher: {s}")),
        }
    }
}

/// Reports whether the CPU has AES and carry-less multiply instructions.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn has_native_aes() -> bool {
    is_x86_feature_detected!("aes") && is_x86_feature_detected!("pclmulqdq")
}

/// Reports whether the CPU has the ARMv8 AES extension.
#[cfg(target_arch = "aarch64")]
pub fn has_native_aes() -> bool {
    std::arch::is_aarch64_feature_detected!("aes")
}

/// No hardware AES detection on this architecture.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub fn has_native_aes() -> bool {
    false
}
