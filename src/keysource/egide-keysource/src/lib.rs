//! # Egide Key Source
//!
//! Where the KMS plugin gets its master key from.
//!
//! The master key never lives in the plugin: it is fetched from a custody
//! service on every request, used, and wiped. Rotating or revoking the key
//! at the custody service therefore takes effect on the next request.
//!
//! ## Sources
//!
//! - [`SecretManagerClient`] - GCP Secret Manager, authenticated with a
//!   service account
//! - [`StaticKeySource`] - in-memory key for development and tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod credentials;
pub mod error;
pub mod secret_manager;
pub mod static_source;

pub use backend::KeySource;
pub use credentials::ServiceAccountCredentials;
pub use error::KeySourceError;
pub use secret_manager::{validate_key_id, SecretManagerClient, SecretManagerConfig};
pub use static_source::StaticKeySource;
