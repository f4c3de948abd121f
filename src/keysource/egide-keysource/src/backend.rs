//! Key source trait definition.

use async_trait::async_trait;
use egide_envelope::MasterKey;

use crate::error::KeySourceError;

/// A custody service holding master keys.
///
/// One handle is shared by every in-flight request, so implementations must
/// be safe to call concurrently.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetches the master key identified by `key_id`.
    ///
    /// Network and authorization failures are errors; an empty key is never
    /// returned as a success.
    async fn fetch(&self, key_id: &str) -> Result<MasterKey, KeySourceError>;

    /// Returns the name of this source for logging.
    fn name(&self) -> &'static str;
}
