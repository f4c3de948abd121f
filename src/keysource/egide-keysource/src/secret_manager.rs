//! GCP Secret Manager key source.
//!
//! The master key is the payload of a secret version
//! (`projects/*/secrets/*/versions/*`), read with the REST `:access` call.
//! Authentication uses the OAuth2 JWT bearer grant: an RS256 assertion
//! signed with the service account key is exchanged for an access token.
//!
//! Only the access token is cached. Key material is fetched on every call.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use jsonwebtoken::{Algorithm, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use egide_envelope::MasterKey;

use crate::backend::KeySource;
use crate::credentials::ServiceAccountCredentials;
use crate::error::KeySourceError;

/// Public Secret Manager API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Access tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Connection settings for [`SecretManagerClient`].
#[derive(Debug, Clone)]
pub struct SecretManagerConfig {
    /// API base URL, without the `/v1` suffix.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SecretManagerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    #[serde(default)]
    name: String,
    payload: Option<SecretPayloadData>,
}

#[derive(Deserialize)]
struct SecretPayloadData {
    #[serde(default)]
    data: String,
}

struct CachedToken {
    token: Zeroizing<String>,
    expires_at: u64,
}

/// Secret Manager client fetching master keys over REST.
///
/// Safe to share between concurrent requests: the HTTP client pools
/// connections and the access token sits behind an async `RwLock`.
pub struct SecretManagerClient {
    http: Client,
    endpoint: String,
    credentials: ServiceAccountCredentials,
    token: RwLock<Option<CachedToken>>,
}

impl SecretManagerClient {
    /// Creates a client for the given service account.
    pub fn new(
        credentials: ServiceAccountCredentials,
        config: SecretManagerConfig,
    ) -> Result<Self, KeySourceError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| KeySourceError::Network(e.to_string()))?;

        info!(
            account = %credentials.client_email(),
            endpoint = %config.endpoint,
            "Secret Manager client ready"
        );

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Creates a client from a service account key file.
    pub fn from_credentials_file(
        path: impl AsRef<std::path::Path>,
        config: SecretManagerConfig,
    ) -> Result<Self, KeySourceError> {
        Self::new(ServiceAccountCredentials::from_file(path)?, config)
    }

    /// Returns a valid access token, refreshing it if needed.
    async fn access_token(&self) -> Result<Zeroizing<String>, KeySourceError> {
        let now = unix_now();

        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > now.saturating_add(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.token.write().await;

        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > now.saturating_add(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.request_token(now).await?;
        let token = fresh.token.clone();
        *slot = Some(fresh);

        Ok(token)
    }

    async fn request_token(&self, now: u64) -> Result<CachedToken, KeySourceError> {
        let claims = AssertionClaims {
            iss: self.credentials.client_email(),
            scope: CLOUD_PLATFORM_SCOPE,
            aud: self.credentials.token_uri(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.credentials.private_key_id().map(str::to_string);

        let assertion = jsonwebtoken::encode(&header, &claims, self.credentials.signing_key())
            .map_err(|e| KeySourceError::Credentials(format!("failed to sign assertion: {e}")))?;

        debug!(token_uri = %self.credentials.token_uri(), "Requesting access token");

        let response = self
            .http
            .post(self.credentials.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| KeySourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token exchange rejected");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    KeySourceError::Unauthorized(format!("token exchange: {status}: {body}"))
                },
                _ => KeySourceError::Network(format!("token exchange: {status}")),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| KeySourceError::InvalidResponse(e.to_string()))?;

        Ok(CachedToken {
            token: Zeroizing::new(token.access_token),
            expires_at: now.saturating_add(token.expires_in),
        })
    }
}

#[async_trait]
impl KeySource for SecretManagerClient {
    async fn fetch(&self, key_id: &str) -> Result<MasterKey, KeySourceError> {
        validate_key_id(key_id)?;

        let token = self.access_token().await?;
        let url = format!("{}/v1/{}:access", self.endpoint, key_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| KeySourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(key_id = %key_id, status = %status, "Secret access failed");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    KeySourceError::Unauthorized(format!("{key_id}: {status}"))
                },
                StatusCode::NOT_FOUND => KeySourceError::NotFound(key_id.to_string()),
                _ => KeySourceError::Network(format!("{key_id}: {status}")),
            });
        }

        // The raw body carries the encoded key, so it is buffered for wiping.
        let raw = Zeroizing::new(Vec::from(
            response
                .bytes()
                .await
                .map_err(|e| KeySourceError::Network(e.to_string()))?,
        ));
        let body: AccessSecretVersionResponse = serde_json::from_slice(&raw)
            .map_err(|e| KeySourceError::InvalidResponse(e.to_string()))?;

        let data = Zeroizing::new(body.payload.map(|p| p.data).unwrap_or_default());
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| KeySourceError::InvalidResponse(format!("payload data: {e}")))?;

        if bytes.is_empty() {
            return Err(KeySourceError::EmptyKey(key_id.to_string()));
        }

        debug!(key_id = %key_id, version = %body.name, "Fetched master key");

        Ok(MasterKey::new(bytes))
    }

    fn name(&self) -> &'static str {
        "gcp-secret-manager"
    }
}

/// Checks that `key_id` names a secret version:
/// `projects/{project}/secrets/{secret}/versions/{version}`.
pub fn validate_key_id(key_id: &str) -> Result<(), KeySourceError> {
    let parts: Vec<&str> = key_id.split('/').collect();

    let well_formed = parts.len() == 6
        && parts[0] == "projects"
        && parts[2] == "secrets"
        && parts[4] == "versions"
        && [parts[1], parts[3], parts[5]]
            .iter()
            .all(|p| !p.is_empty() && !p.contains(':'));

    if !well_formed {
        return Err(KeySourceError::InvalidKeyId(format!(
            "{key_id:?} does not match projects/*/secrets/*/versions/*"
        )));
    }

    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
