//! Integration tests for the Egide KMS plugin.
//!
//! These tests drive the real gRPC server over a unix domain socket, the same
//! way the Kubernetes API server does.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use egide_envelope::AeadAlgorithm;
use egide_keysource::KeySource;
use egide_kms_plugin::proto::key_management_service_client::KeyManagementServiceClient;
use egide_kms_plugin::proto::{DecryptRequest, EncryptRequest, VersionRequest, VersionResponse};
use egide_kms_plugin::{
    KeySourceConfig, PluginConfig, PluginError, PluginServer, ServiceState, SocketPath,
};
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Status;
use tower::service_fn;

/// API version sent by the test client.
pub const CLIENT_API_VERSION: &str = "v1beta1";

// ============================================================================
// Test Plugin
// ============================================================================

/// Options for an in-process plugin.
#[derive(Clone)]
pub struct PluginOptions {
    /// Master key source.
    pub key_source: Arc<dyn KeySource>,
    /// Graceful shutdown bound.
    pub drain_timeout: Option<Duration>,
    /// Cipher override.
    pub cipher: Option<AeadAlgorithm>,
}

impl PluginOptions {
    /// Defaults around the given key source.
    pub fn new(key_source: Arc<dyn KeySource>) -> Self {
        Self {
            key_source,
            drain_timeout: None,
            cipher: None,
        }
    }
}

/// A plugin served in-process on a socket in its own temporary directory.
pub struct TestPlugin {
    pub socket: PathBuf,
    states: watch::Receiver<ServiceState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), PluginError>>>,
    _dir: TempDir,
}

impl TestPlugin {
    /// Starts a plugin in a fresh temporary directory.
    pub async fn start(options: PluginOptions) -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp dir")?;
        Self::start_in(dir, options).await
    }

    /// Starts a plugin listening on `kms.sock` inside `dir`.
    pub async fn start_in(dir: TempDir, options: PluginOptions) -> Result<Self> {
        let socket = dir.path().join("kms.sock");

        let config = PluginConfig {
            key_source: KeySourceConfig::Dev,
            key_id: "projects/test/secrets/kms/versions/1".to_string(),
            socket: SocketPath::Filesystem(socket.clone()),
            drain_timeout: options.drain_timeout,
            cipher: options.cipher,
        };
        config.validate()?;

        let mut server = PluginServer::new(config);
        server.initialize(options.key_source)?;
        server.bind()?;

        let states = server.subscribe();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async {
            let _ = rx.await;
        }));

        Ok(Self {
            socket,
            states,
            shutdown: Some(tx),
            handle: Some(handle),
            _dir: dir,
        })
    }

    /// Connects a new client.
    pub async fn client(&self) -> Result<KmsClient> {
        KmsClient::connect(&self.socket).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.states.borrow()
    }

    /// Requests shutdown and waits for the server to stop.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .context("Plugin failed to stop within 10 seconds")???;
        }

        Ok(())
    }
}

impl Drop for TestPlugin {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// gRPC client for the KMS plugin protocol over a unix socket.
#[derive(Clone)]
pub struct KmsClient {
    inner: KeyManagementServiceClient<Channel>,
}

impl KmsClient {
    /// Connects to the plugin listening on `socket`.
    pub async fn connect(socket: &Path) -> Result<Self> {
        let socket = socket.to_path_buf();

        // The URI is required by the endpoint but ignored by the connector.
        let channel = Endpoint::try_from("http://[::]:50051")?
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket = socket.clone();
                async move {
                    Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?))
                }
            }))
            .await
            .context("Failed to connect to plugin socket")?;

        Ok(Self {
            inner: KeyManagementServiceClient::new(channel),
        })
    }

    pub async fn version(&self) -> Result<VersionResponse, Status> {
        let request = VersionRequest {
            version: CLIENT_API_VERSION.to_string(),
        };
        Ok(self.inner.clone().version(request).await?.into_inner())
    }

    pub async fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, Status> {
        let request = EncryptRequest {
            version: CLIENT_API_VERSION.to_string(),
            plain: plain.to_vec(),
        };
        Ok(self.inner.clone().encrypt(request).await?.into_inner().cipher)
    }

    pub async fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, Status> {
        let request = DecryptRequest {
            version: CLIENT_API_VERSION.to_string(),
            cipher: cipher.to_vec(),
        };
        Ok(self.inner.clone().decrypt(request).await?.into_inner().plain)
    }
}

// ============================================================================
// Plugin Binary
// ============================================================================

/// Find the plugin binary in the target directory.
pub fn find_plugin_binary() -> Option<PathBuf> {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());

    // Try debug build first, then release
    let candidates = [
        Path::new(&manifest_dir).join("../../target/debug/egide-kms-plugin"),
        Path::new(&manifest_dir).join("../../target/release/egide-kms-plugin"),
    ];

    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .and_then(|candidate| candidate.canonicalize().ok())
}

/// Wait until the socket accepts connections.
pub async fn wait_for_socket(socket: &Path) -> Result<()> {
    for _ in 0..50 {
        if UnixStream::connect(socket).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    bail!("Plugin failed to listen within 5 seconds")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use egide_envelope::{MasterKey, SecretPayload};
    use egide_keysource::{KeySourceError, StaticKeySource};
    use tokio::sync::Notify;
    use tonic::Code;

    fn static_source(key: &[u8]) -> Arc<dyn KeySource> {
        Arc::new(StaticKeySource::new(MasterKey::from_bytes(key)))
    }

    async fn start(key: &[u8]) -> TestPlugin {
        TestPlugin::start(PluginOptions::new(static_source(key)))
            .await
            .unwrap()
    }

    /// Key source whose remote backend is down.
    struct UnreachableSource;

    #[async_trait]
    impl KeySource for UnreachableSource {
        async fn fetch(&self, key_id: &str) -> Result<MasterKey, KeySourceError> {
            Err(KeySourceError::Network(format!("{key_id}: connection refused")))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    /// Key source that holds each fetch until released.
    struct GatedSource {
        entered: Notify,
        release: Notify,
        released: AtomicBool,
    }

    #[async_trait]
    impl KeySource for GatedSource {
        async fn fetch(&self, _key_id: &str) -> Result<MasterKey, KeySourceError> {
            self.entered.notify_one();
            if !self.released.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(MasterKey::from_bytes(b"testkey"))
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    // --- Version ---

    #[tokio::test]
    async fn test_version_handshake() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let first = client.version().await.unwrap();
        let second = client.version().await.unwrap();

        assert_eq!(first.version, "v1beta1");
        assert_eq!(first.runtime_name, "GCP Secret Manager");
        assert_eq!(first.runtime_version, egide_kms_plugin::RUNTIME_VERSION);
        assert_eq!(first, second);
    }

    // --- Encrypt / Decrypt ---

    #[tokio::test]
    async fn test_hello_world_round_trip() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let cipher = client.encrypt(b"hello world").await.unwrap();
        let plain = client.decrypt(&cipher).await.unwrap();

        assert_eq!(plain, b"hello world");
    }

    #[tokio::test]
    async fn test_ciphertext_is_envelope_payload() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let cipher = client.encrypt(b"hello world").await.unwrap();
        let payload = SecretPayload::from_bytes(&cipher).unwrap();

        assert_eq!(payload.ciphertext().len(), b"hello world".len() + 16);
        assert!(!String::from_utf8_lossy(&cipher).contains("hello world"));
    }

    #[tokio::test]
    async fn test_encrypt_is_not_deterministic() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let first = client.encrypt(b"same").await.unwrap();
        let second = client.encrypt(b"same").await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let sealer = start(b"testkey").await;
        let opener = start(b"wrongkey").await;

        let cipher = sealer.client().await.unwrap().encrypt(b"hello world").await.unwrap();
        let status = opener.client().await.unwrap().decrypt(&cipher).await.unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "decryption failed");
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let cipher = client.encrypt(b"hello world").await.unwrap();
        let payload = SecretPayload::from_bytes(&cipher).unwrap();
        let mut ciphertext = payload.ciphertext().to_vec();
        ciphertext[0] ^= 0x01;
        let tampered = SecretPayload::new(*payload.salt(), *payload.nonce(), ciphertext)
            .to_bytes()
            .unwrap();

        let status = client.decrypt(&tampered).await.unwrap_err();

        // Indistinguishable from a wrong key.
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "decryption failed");
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let inputs: [&[u8]; 4] = [
            b"",
            b"garbage",
            b"{}",
            b"{\"s\":\"\",\"n\":\"\",\"c\":\"\"}",
        ];
        for input in inputs {
            let status = client.decrypt(input).await.unwrap_err();
            assert_eq!(status.code(), Code::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn test_key_source_failure_is_unavailable() {
        let plugin = TestPlugin::start(PluginOptions::new(Arc::new(UnreachableSource)))
            .await
            .unwrap();
        let client = plugin.client().await.unwrap();

        let status = client.encrypt(b"data").await.unwrap_err();

        assert_eq!(status.code(), Code::Unavailable);
        assert!(!status.message().contains("projects/"));
    }

    #[tokio::test]
    async fn test_payload_opens_under_other_cipher() {
        let key = static_source(b"testkey");

        let mut aes = PluginOptions::new(key.clone());
        aes.cipher = Some(AeadAlgorithm::Aes256Gcm);
        let mut chacha = PluginOptions::new(key);
        chacha.cipher = Some(AeadAlgorithm::ChaCha20Poly1305);

        let sealer = TestPlugin::start(aes).await.unwrap();
        let opener = TestPlugin::start(chacha).await.unwrap();

        let cipher = sealer.client().await.unwrap().encrypt(b"hello world").await.unwrap();
        let plain = opener.client().await.unwrap().decrypt(&cipher).await.unwrap();

        assert_eq!(plain, b"hello world");
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_independent() {
        let plugin = start(b"testkey").await;
        let client = plugin.client().await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let plain = format!("secret-{i}").into_bytes();
                    let cipher = client.encrypt(&plain).await.unwrap();
                    (plain, client.decrypt(&cipher).await.unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (expected, actual) = handle.await.unwrap();
            assert_eq!(expected, actual);
        }
    }

    // --- Lifecycle ---

    #[tokio::test]
    async fn test_lifecycle_and_socket_cleanup() {
        let mut plugin = start(b"testkey").await;
        assert_eq!(plugin.state(), ServiceState::Serving);
        assert!(plugin.socket.exists());

        plugin.stop().await.unwrap();

        assert_eq!(plugin.state(), ServiceState::Stopped);
        assert!(!plugin.socket.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_replaced() {
        let dir = TempDir::new().unwrap();
        drop(std::os::unix::net::UnixListener::bind(dir.path().join("kms.sock")).unwrap());

        let plugin = TestPlugin::start_in(dir, PluginOptions::new(static_source(b"testkey")))
            .await
            .unwrap();

        let version = plugin.client().await.unwrap().version().await.unwrap();
        assert_eq!(version.version, "v1beta1");
    }

    #[tokio::test]
    async fn test_in_flight_call_completes_during_shutdown() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
            released: AtomicBool::new(false),
        });
        let mut plugin = TestPlugin::start(PluginOptions::new(source.clone()))
            .await
            .unwrap();
        let client = plugin.client().await.unwrap();

        let call = tokio::spawn(async move { client.encrypt(b"in flight").await });
        source.entered.notified().await;

        let mut states = plugin.states.clone();
        plugin.shutdown.take().unwrap().send(()).unwrap();
        states
            .wait_for(|s| *s == ServiceState::Draining)
            .await
            .unwrap();

        source.released.store(true, Ordering::SeqCst);
        source.release.notify_one();

        assert!(call.await.unwrap().is_ok());
        plugin.stop().await.unwrap();
        assert_eq!(plugin.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_stuck_call() {
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
            released: AtomicBool::new(false),
        });
        let mut options = PluginOptions::new(source.clone());
        options.drain_timeout = Some(Duration::from_millis(200));
        let mut plugin = TestPlugin::start(options).await.unwrap();
        let client = plugin.client().await.unwrap();

        let call = tokio::spawn(async move { client.encrypt(b"never released").await });
        source.entered.notified().await;

        let started = std::time::Instant::now();
        plugin.stop().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(plugin.state(), ServiceState::Stopped);
        assert!(!plugin.socket.exists());

        call.abort();
    }

    // --- Binary ---

    #[tokio::test]
    async fn test_binary_dev_mode_serves_and_stops_on_sigterm() {
        let Some(binary) = find_plugin_binary() else {
            eprintln!("egide-kms-plugin binary not built, skipping");
            return;
        };

        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("kms.sock");

        let mut process = std::process::Command::new(&binary)
            .arg("--dev")
            .arg("--unix-socket")
            .arg(&socket)
            .env_remove("EGIDE_KMS_CREDENTIALS")
            .env_remove("EGIDE_KMS_KEY_URI")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();

        wait_for_socket(&socket).await.unwrap();

        let client = KmsClient::connect(&socket).await.unwrap();
        let cipher = client.encrypt(b"hello world").await.unwrap();
        assert_eq!(client.decrypt(&cipher).await.unwrap(), b"hello world");
        drop(client);

        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(process.id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        let mut exit = None;
        for _ in 0..50 {
            if let Some(status) = process.try_wait().unwrap() {
                exit = Some(status);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let exit = exit.unwrap_or_else(|| {
            let _ = process.kill();
            panic!("Plugin did not stop within 5 seconds of SIGTERM");
        });
        assert!(exit.success());
        assert!(!socket.exists());
    }
}
