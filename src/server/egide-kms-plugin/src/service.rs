//! KMS plugin protocol handler.
//!
//! Every Encrypt/Decrypt call fetches the master key from the key source,
//! runs the envelope cipher and wipes the key before the response is sent.
//! Nothing cryptographic is kept between calls.

use std::sync::Arc;

use egide_envelope::EnvelopeCipher;
use egide_keysource::KeySource;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::error::PluginError;
use crate::proto::key_management_service_server::KeyManagementService;
use crate::proto::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, VersionRequest,
    VersionResponse,
};

/// KMS plugin API version implemented by this service.
pub const API_VERSION: &str = "v1beta1";

/// Name of the key custody backend reported to the API server.
pub const RUNTIME_NAME: &str = "GCP Secret Manager";

/// Plugin version reported to the API server.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Constant answer to the Version handshake.
pub fn version_response() -> VersionResponse {
    VersionResponse {
        version: API_VERSION.to_string(),
        runtime_name: RUNTIME_NAME.to_string(),
        runtime_version: RUNTIME_VERSION.to_string(),
    }
}

/// Envelope encryption service bound to one master key id.
pub struct KmsService<K: ?Sized> {
    key_source: Arc<K>,
    key_id: String,
    cipher: EnvelopeCipher,
}

impl<K: KeySource + ?Sized> KmsService<K> {
    /// Creates a service that seals under `key_id` from `key_source`.
    pub fn new(key_source: Arc<K>, key_id: impl Into<String>, cipher: EnvelopeCipher) -> Self {
        Self {
            key_source,
            key_id: key_id.into(),
            cipher,
        }
    }

    /// Master key id this service uses.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Seals `plain` into a payload.
    pub async fn encrypt_payload(&self, plain: &[u8]) -> Result<Vec<u8>, PluginError> {
        let mut master_key = self.key_source.fetch(&self.key_id).await?;

        let result = self.cipher.encrypt(&master_key, plain);
        master_key.destroy();

        Ok(result?)
    }

    /// Opens a payload produced by [`Self::encrypt_payload`].
    pub async fn decrypt_payload(
        &self,
        payload: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, PluginError> {
        let mut master_key = self.key_source.fetch(&self.key_id).await?;

        let result = self.cipher.decrypt(&master_key, payload);
        master_key.destroy();

        Ok(result?)
    }
}

impl<K: ?Sized> std::fmt::Debug for KmsService<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsService")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.cipher.algorithm())
            .finish_non_exhaustive()
    }
}

fn log_failure(operation: &'static str, e: &PluginError) {
    match e {
        PluginError::Envelope(_) => warn!(operation, error = %e, "Request rejected"),
        _ => error!(operation, error = %e, "Request failed"),
    }
}

#[tonic::async_trait]
impl<K: KeySource + ?Sized + 'static> KeyManagementService for KmsService<K> {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        debug!(caller_version = %request.get_ref().version, "Version requested");
        Ok(Response::new(version_response()))
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> Result<Response<DecryptResponse>, Status> {
        let request = request.into_inner();
        debug!(
            caller_version = %request.version,
            size = request.cipher.len(),
            "Processing decrypt request"
        );

        let mut plain = self.decrypt_payload(&request.cipher).await.map_err(|e| {
            log_failure("decrypt", &e);
            Status::from(e)
        })?;

        Ok(Response::new(DecryptResponse {
            plain: std::mem::take(&mut *plain),
        }))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> Result<Response<EncryptResponse>, Status> {
        let request = request.into_inner();
        debug!(
            caller_version = %request.version,
            size = request.plain.len(),
            "Processing encrypt request"
        );

        let plain = Zeroizing::new(request.plain);
        let cipher = self.encrypt_payload(&plain).await.map_err(|e| {
            log_failure("encrypt", &e);
            Status::from(e)
        })?;

        Ok(Response::new(EncryptResponse { cipher }))
    }
}
