//! Unix socket gRPC server.

use std::future::Future;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;

use egide_keysource::KeySource;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{debug, info, warn};

use crate::config::{PluginConfig, SocketPath};
use crate::error::PluginError;
use crate::lifecycle::{Lifecycle, ServiceState};
use crate::proto::key_management_service_server::KeyManagementServiceServer;
use crate::service::KmsService;

/// KMS plugin process: configuration, lifecycle, service and listener.
pub struct PluginServer<K: ?Sized> {
    config: PluginConfig,
    lifecycle: Lifecycle,
    service: Option<KmsService<K>>,
    listener: Option<UnixListener>,
}

impl<K: KeySource + ?Sized + 'static> PluginServer<K> {
    /// Creates an uninitialized server.
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            service: None,
            listener: None,
        }
    }

    /// Configuration the server was built with.
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    /// Follows lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.lifecycle.subscribe()
    }

    /// Attaches the key source.
    pub fn initialize(&mut self, key_source: Arc<K>) -> Result<(), PluginError> {
        self.lifecycle.advance(ServiceState::Initialized)?;

        let cipher = self.config.envelope_cipher();
        info!(
            key_source = key_source.name(),
            key_id = %self.config.key_id,
            algorithm = %cipher.algorithm(),
            "Key source initialized"
        );

        self.service = Some(KmsService::new(
            key_source,
            self.config.key_id.clone(),
            cipher,
        ));

        Ok(())
    }

    /// Binds the listening socket, replacing a stale socket file.
    pub fn bind(&mut self) -> Result<(), PluginError> {
        let state = self.lifecycle.state();
        if state != ServiceState::Initialized {
            return Err(PluginError::InvalidTransition {
                from: state,
                to: ServiceState::Serving,
            });
        }

        let listener = match &self.config.socket {
            SocketPath::Filesystem(path) => {
                remove_stale_socket(path)?;
                UnixListener::bind(path)
            },
            SocketPath::Abstract(name) => bind_abstract(name),
        }
        .map_err(|e| {
            PluginError::Transport(format!("failed to listen on {}: {e}", self.config.socket))
        })?;

        self.listener = Some(listener);
        self.lifecycle.advance(ServiceState::Serving)?;

        info!(socket = %self.config.socket, "Listening on unix domain socket");

        Ok(())
    }

    /// Serves calls until `shutdown` resolves, then drains in-flight calls.
    ///
    /// Draining waits for every call unless a drain timeout is configured.
    /// The socket file is removed once the server has stopped.
    pub async fn serve<F>(mut self, shutdown: F) -> Result<(), PluginError>
    where
        F: Future<Output = ()>,
    {
        let state = self.lifecycle.state();
        let (Some(service), Some(listener)) = (self.service.take(), self.listener.take()) else {
            return Err(PluginError::InvalidTransition {
                from: state,
                to: ServiceState::Serving,
            });
        };

        let lifecycle = self.lifecycle.clone();
        let signal = async move {
            shutdown.await;
            info!("Shutdown requested, draining in-flight calls");
            if let Err(e) = lifecycle.advance(ServiceState::Draining) {
                debug!(error = %e, "Drain already under way");
            }
        };

        let server = Server::builder()
            .add_service(KeyManagementServiceServer::new(service))
            .serve_with_incoming_shutdown(UnixListenerStream::new(listener), signal);

        let result = match self.config.drain_timeout {
            None => server.await,
            Some(timeout) => {
                let mut state = self.lifecycle.subscribe();
                let deadline = async move {
                    // The receiver only errs once the lifecycle is dropped.
                    let _ = state.wait_for(|s| *s >= ServiceState::Draining).await;
                    tokio::time::sleep(timeout).await;
                };

                tokio::select! {
                    result = server => result,
                    _ = deadline => {
                        warn!(
                            timeout_secs = timeout.as_secs(),
                            "Drain timeout elapsed, abandoning in-flight calls"
                        );
                        Ok(())
                    },
                }
            },
        };

        self.lifecycle.advance(ServiceState::Stopped)?;
        self.cleanup_socket();

        info!("Server stopped");

        result.map_err(|e| PluginError::Transport(e.to_string()))
    }

    fn cleanup_socket(&self) {
        if let SocketPath::Filesystem(path) = &self.config.socket {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(socket = %path.display(), "Socket file removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => {
                    warn!(socket = %path.display(), error = %e, "Failed to remove socket file")
                },
            }
        }
    }
}

/// Removes a leftover socket file from a previous run.
fn remove_stale_socket(path: &Path) -> Result<(), PluginError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path).map_err(|e| {
                PluginError::Transport(format!(
                    "failed to delete the socket file {}: {e}",
                    path.display()
                ))
            })?;
            debug!(socket = %path.display(), "Removed stale socket file");
            Ok(())
        },
        Ok(_) => Err(PluginError::Configuration(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PluginError::Transport(format!(
            "failed to inspect {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = StdUnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;

    UnixListener::from_std(listener)
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(_name: &str) -> io::Result<UnixListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract sockets are only supported on Linux",
    ))
}
