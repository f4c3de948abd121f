//! Startup configuration.
//!
//! Command line flags (with environment fallbacks) are parsed once into an
//! immutable [`PluginConfig`] that is handed to the server and its
//! collaborators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use egide_envelope::{AeadAlgorithm, EnvelopeCipher};
use egide_keysource::validate_key_id;

use crate::error::PluginError;

/// Socket the API server is configured to dial by default.
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/k8splugin.sock";

/// Key id reported in logs when running in development mode.
pub const DEV_KEY_ID: &str = "dev";

/// Command line interface.
#[derive(Debug, Parser)]
#[command(name = "egide-kms-plugin")]
#[command(about = "Egide KMS plugin - envelope encryption backed by GCP Secret Manager")]
#[command(version)]
pub struct PluginArgs {
    /// Path to the GCP service account credentials JSON file
    #[arg(long, env = "EGIDE_KMS_CREDENTIALS", required_unless_present = "dev")]
    pub credentials: Option<PathBuf>,

    /// Secret version holding the master key: projects/*/secrets/*/versions/*
    #[arg(long = "key-uri", env = "EGIDE_KMS_KEY_URI", required_unless_present = "dev")]
    pub key_uri: Option<String>,

    /// Unix socket path, or a Linux abstract socket name starting with '@'
    #[arg(long = "unix-socket", default_value = DEFAULT_UNIX_SOCKET, env = "EGIDE_KMS_UNIX_SOCKET")]
    pub unix_socket: String,

    /// Seconds to wait for in-flight calls on shutdown (waits indefinitely if unset)
    #[arg(long = "drain-timeout", env = "EGIDE_KMS_DRAIN_TIMEOUT")]
    pub drain_timeout: Option<u64>,

    /// Force a cipher instead of detecting hardware AES (aes256-gcm, chacha20-poly1305)
    #[arg(long, env = "EGIDE_KMS_CIPHER")]
    pub cipher: Option<AeadAlgorithm>,

    /// Enable development mode (random in-memory master key)
    #[arg(long, env = "EGIDE_KMS_DEV_MODE")]
    pub dev: bool,
}

/// Where the master key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySourceConfig {
    /// GCP Secret Manager, authenticated with a service account key file.
    SecretManager {
        /// Service account key file.
        credentials: PathBuf,
    },
    /// Random key generated at startup and held in memory.
    Dev,
}

/// Listening address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPath {
    /// Socket file on disk.
    Filesystem(PathBuf),
    /// Linux abstract namespace name (without the leading '@').
    Abstract(String),
}

impl SocketPath {
    /// Parses a socket argument; a leading '@' selects the abstract namespace.
    pub fn parse(value: &str) -> Result<Self, PluginError> {
        match value.strip_prefix('@') {
            Some("") => Err(PluginError::Configuration(
                "abstract socket name must not be empty".to_string(),
            )),
            Some(name) => Ok(Self::Abstract(name.to_string())),
            None if value.is_empty() => Err(PluginError::Configuration(
                "unix socket path must not be empty".to_string(),
            )),
            None => Ok(Self::Filesystem(PathBuf::from(value))),
        }
    }
}

impl std::fmt::Display for SocketPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filesystem(path) => write!(f, "{}", path.display()),
            Self::Abstract(name) => write!(f, "@{name}"),
        }
    }
}

/// Validated plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Master key source.
    pub key_source: KeySourceConfig,
    /// Identifier of the master key within the source.
    pub key_id: String,
    /// Listening socket.
    pub socket: SocketPath,
    /// Upper bound on graceful shutdown; `None` waits for every call.
    pub drain_timeout: Option<Duration>,
    /// Cipher override; `None` selects by hardware support.
    pub cipher: Option<AeadAlgorithm>,
}

impl PluginConfig {
    /// Builds and validates the configuration from parsed arguments.
    pub fn from_args(args: PluginArgs) -> Result<Self, PluginError> {
        let (key_source, key_id) = if args.dev {
            (
                KeySourceConfig::Dev,
                args.key_uri.unwrap_or_else(|| DEV_KEY_ID.to_string()),
            )
        } else {
            let credentials = args.credentials.ok_or_else(|| {
                PluginError::Configuration("--credentials is required".to_string())
            })?;
            let key_id = args
                .key_uri
                .ok_or_else(|| PluginError::Configuration("--key-uri is required".to_string()))?;
            (KeySourceConfig::SecretManager { credentials }, key_id)
        };

        let config = Self {
            key_source,
            key_id,
            socket: SocketPath::parse(&args.unix_socket)?,
            drain_timeout: args.drain_timeout.map(Duration::from_secs),
            cipher: args.cipher,
        };

        config.validate()?;

        Ok(config)
    }

    /// Checks the socket location and key source settings.
    pub fn validate(&self) -> Result<(), PluginError> {
        match &self.socket {
            SocketPath::Filesystem(path) => {
                let dir = socket_dir(path);
                if !dir.is_dir() {
                    return Err(PluginError::Configuration(format!(
                        "directory {} of unix socket path {} does not exist",
                        dir.display(),
                        path.display()
                    )));
                }
            },
            SocketPath::Abstract(_) if !cfg!(target_os = "linux") => {
                return Err(PluginError::Configuration(
                    "abstract sockets are only supported on Linux".to_string(),
                ));
            },
            SocketPath::Abstract(_) => {},
        }

        if let KeySourceConfig::SecretManager { credentials } = &self.key_source {
            if !credentials.is_file() {
                return Err(PluginError::Configuration(format!(
                    "credentials file {} does not exist",
                    credentials.display()
                )));
            }

            validate_key_id(&self.key_id)
                .map_err(|e| PluginError::Configuration(e.to_string()))?;
        }

        Ok(())
    }

    /// Envelope cipher honouring the override, if any.
    pub fn envelope_cipher(&self) -> EnvelopeCipher {
        match self.cipher {
            Some(algorithm) => EnvelopeCipher::with_algorithm(algorithm),
            None => EnvelopeCipher::new(),
        }
    }

    /// Returns true in development mode.
    pub fn is_dev(&self) -> bool {
        self.key_source == KeySourceConfig::Dev
    }
}

fn socket_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
