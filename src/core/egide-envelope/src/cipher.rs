//! Envelope encrypt / decrypt.

use tracing::debug;
use zeroize::Zeroizing;

use crate::aead::AeadAlgorithm;
use crate::error::EnvelopeError;
use crate::kdf::derive_data_key;
use crate::keys::MasterKey;
use crate::payload::SecretPayload;
use crate::random::{generate_nonce, generate_salt};

/// Seals and opens secret payloads under a caller-supplied master key.
///
/// Holds no key material, only the preferred cipher, so a single value can
/// be shared by every concurrent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCipher {
    algorithm: AeadAlgorithm,
}

impl EnvelopeCipher {
    /// Uses the cipher preferred by this host's hardware.
    pub fn new() -> Self {
        Self {
            algorithm: AeadAlgorithm::preferred(),
        }
    }

    /// Uses a fixed cipher regardless of hardware.
    pub fn with_algorithm(algorithm: AeadAlgorithm) -> Self {
        Self { algorithm }
    }

    /// The cipher used for new payloads.
    pub fn algorithm(&self) -> AeadAlgorithm {
        self.algorithm
    }

    /// Encrypts `plaintext` into a wire-encoded payload.
    ///
    /// A fresh salt and nonce are drawn for every call, so equal plaintexts
    /// never produce equal payloads.
    pub fn encrypt(
        &self,
        master_key: &MasterKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let salt = generate_salt()?;
        let data_key = derive_data_key(master_key, &salt)?;
        let nonce = generate_nonce()?;

        let ciphertext = self.algorithm.seal(&data_key, &nonce, plaintext)?;

        debug!(
            algorithm = %self.algorithm,
            plaintext_len = plaintext.len(),
            "Sealed payload"
        );

        SecretPayload::new(salt, nonce, ciphertext).to_bytes()
    }

    /// Decrypts a wire-encoded payload.
    ///
    /// Payloads do not record which cipher sealed them. The preferred cipher
    /// is tried first and, if the tag does not verify, the other supported
    /// cipher, so payloads written on a host with different AES support
    /// still open. Failure of both is reported as
    /// [`EnvelopeError::Authentication`].
    pub fn decrypt(
        &self,
        master_key: &MasterKey,
        payload: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
        let payload = SecretPayload::from_bytes(payload)?;
        let data_key = derive_data_key(master_key, payload.salt())?;

        match self
            .algorithm
            .open(&data_key, payload.nonce(), payload.ciphertext())
        {
            Err(EnvelopeError::Authentication) => {
                let alternate = self.algorithm.alternate();
                debug!(algorithm = %alternate, "Retrying payload with alternate cipher");
                alternate.open(&data_key, payload.nonce(), payload.ciphertext())
            },
            result => result,
        }
    }
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self::new()
    }
}
