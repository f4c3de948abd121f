//! Service account credentials.
//!
//! Loads a Google service account key file and keeps only what is needed to
//! sign OAuth2 assertions. The PEM text is wiped once the signing key has
//! been parsed.

use std::path::Path;

use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use zeroize::{Zeroize, Zeroizing};

use crate::error::KeySourceError;

/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// A parsed service account key.
#[derive(Clone)]
pub struct ServiceAccountCredentials {
    client_email: String,
    private_key_id: Option<String>,
    token_uri: String,
    signing_key: EncodingKey,
}

impl ServiceAccountCredentials {
    /// Reads and parses a service account key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeySourceError> {
        let path = path.as_ref();
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            KeySourceError::Credentials(format!("failed to read {}: {e}", path.display()))
        })?);

        Self::from_json(&contents)
    }

    /// Parses a service account key from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, KeySourceError> {
        let mut raw: CredentialsFile = serde_json::from_str(json)
            .map_err(|e| KeySourceError::Credentials(e.to_string()))?;

        if let Some(kind) = raw.kind.as_deref() {
            if kind != "service_account" {
                raw.private_key.zeroize();
                return Err(KeySourceError::Credentials(format!(
                    "unsupported credentials type: {kind}"
                )));
            }
        }

        let signing_key = EncodingKey::from_rsa_pem(raw.private_key.as_bytes());
        raw.private_key.zeroize();
        let signing_key = signing_key
            .map_err(|e| KeySourceError::Credentials(format!("invalid private key: {e}")))?;

        Ok(Self {
            client_email: raw.client_email,
            private_key_id: raw.private_key_id,
            token_uri: raw
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            signing_key,
        })
    }

    /// Overrides the OAuth2 token endpoint.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    /// Service account e-mail, the assertion issuer.
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Key id placed in the assertion header, if the file carries one.
    pub fn private_key_id(&self) -> Option<&str> {
        self.private_key_id.as_deref()
    }

    /// OAuth2 token endpoint.
    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub(crate) fn signing_key(&self) -> &EncodingKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}
