//! # Egide KMS Plugin
//!
//! Kubernetes KMS plugin (protocol `v1beta1`) backed by a master key held in
//! GCP Secret Manager.
//!
//! The API server calls `Encrypt` and `Decrypt` over a unix domain socket.
//! Each call fetches the master key, runs the envelope cipher from
//! `egide-envelope` and wipes the key before answering.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod transport;

/// Generated protocol types.
pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::all)]

    tonic::include_proto!("v1beta1");
}

pub use config::{KeySourceConfig, PluginArgs, PluginConfig, SocketPath};
pub use error::PluginError;
pub use lifecycle::{Lifecycle, ServiceState};
pub use service::{KmsService, API_VERSION, RUNTIME_NAME, RUNTIME_VERSION};
pub use transport::PluginServer;
