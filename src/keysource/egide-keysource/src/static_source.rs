//! In-memory key source.
//!
//! Serves one fixed master key for any key id. Used by development mode and
//! tests; payloads sealed under a generated key cannot be opened after the
//! process exits.

use async_trait::async_trait;
use egide_envelope::{random::generate_bytes, EnvelopeError, MasterKey};

use crate::backend::KeySource;
use crate::error::KeySourceError;

/// Length of keys produced by [`StaticKeySource::generate`].
const GENERATED_KEY_SIZE: usize = 32;

/// A key source backed by a key held in process memory.
#[derive(Debug)]
pub struct StaticKeySource {
    key: MasterKey,
}

impl StaticKeySource {
    /// Serves the given key.
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    /// Serves a freshly generated random key.
    pub fn generate() -> Result<Self, EnvelopeError> {
        Ok(Self::new(MasterKey::new(generate_bytes(GENERATED_KEY_SIZE)?)))
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self, key_id: &str) -> Result<MasterKey, KeySourceError> {
        if self.key.is_empty() {
            return Err(KeySourceError::EmptyKey(key_id.to_string()));
        }

        // Each request owns, and wipes, its own copy.
        Ok(self.key.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
