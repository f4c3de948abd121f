//! Secure key types with automatic memory zeroization.
//!
//! Key buffers implement `Zeroize` and `ZeroizeOnDrop`: whatever path a
//! request takes out of the scope that owns a key (success, error or early
//! return), the bytes are wiped with writes the compiler cannot elide.
//!
//! This is memory hygiene only. It does not protect against swap, core
//! dumps or an attacker able to read process memory while the key is live.

use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;
use crate::random::fill_random;

/// Master key bytes fetched from a key source for one request.
///
/// The length is whatever the custody service stores; it is only ever used
/// as an HMAC key, so any length is acceptable.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Takes ownership of raw key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Copies key bytes out of a borrowed slice.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the key holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrites the key in place with fresh random bytes of the same length.
    ///
    /// If the random source is unavailable the buffer is zeroed instead, so
    /// the original material is gone either way. The drop-time zeroization
    /// still runs afterwards.
    pub fn destroy(&mut self) {
        if let Err(e) = fill_random(&mut self.bytes) {
            warn!(error = %e, "Random overwrite failed, zeroing master key instead");
            // Slice zeroize keeps the length, unlike Vec::zeroize.
            self.bytes.as_mut_slice().zeroize();
        }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 256-bit data encryption key derived for a single payload.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    #[cfg(test)]
    pub(crate) fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub(crate) fn zeroed() -> Self {
        Self {
            bytes: [0u8; KEY_SIZE],
        }
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.bytes
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
