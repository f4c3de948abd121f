//! Data key derivation.
//!
//! The data encryption key for a payload is `HMAC-SHA256(master_key, salt)`.
//! Equal `(master_key, salt)` pairs always produce the same key, which is
//! how decryption recovers the key from the salt stored in the payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::EnvelopeError;
use crate::keys::{DataKey, MasterKey};

type HmacSha256 = Hmac<Sha256>;

/// Derives the 256-bit data key for one payload.
///
/// # Arguments
///
/// * `master_key` - Master key fetched for this request
/// * `salt` - Per-payload random salt
pub fn derive_data_key(master_key: &MasterKey, salt: &[u8]) -> Result<DataKey, EnvelopeError> {
    let mut mac = HmacSha256::new_from_slice(master_key.as_bytes())
        .map_err(|e| EnvelopeError::KeyDerivation(e.to_string()))?;
    mac.update(salt);

    // Written in place so no unwiped copy of the key is left behind.
    let mut data_key = DataKey::zeroed();
    let mut tag = mac.finalize().into_bytes();
    data_key.as_mut_bytes().copy_from_slice(&tag);
    tag.as_mut_slice().zeroize();

    Ok(data_key)
}
