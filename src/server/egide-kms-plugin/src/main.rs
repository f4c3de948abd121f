//! Egide KMS Plugin - Main entry point.

use std::sync::Arc;

use clap::Parser;
use egide_keysource::{KeySource, SecretManagerClient, SecretManagerConfig, StaticKeySource};
use egide_kms_plugin::{KeySourceConfig, PluginArgs, PluginConfig, PluginServer};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PluginConfig::from_args(PluginArgs::parse())?;

    tracing::info!("Starting Egide KMS plugin...");
    tracing::info!("Unix socket: {}", config.socket);

    let key_source: Arc<dyn KeySource> = match &config.key_source {
        KeySourceConfig::SecretManager { credentials } => {
            let sm_config = SecretManagerConfig::default();
            Arc::new(SecretManagerClient::from_credentials_file(credentials, sm_config)?)
        },
        KeySourceConfig::Dev => {
            tracing::warn!("Development mode enabled - DO NOT USE IN PRODUCTION");
            tracing::warn!("Master key is random and lost on exit");
            Arc::new(StaticKeySource::generate()?)
        },
    };

    let mut server = PluginServer::new(config);
    server.initialize(key_source)?;
    server.bind()?;

    tracing::info!("Egide KMS plugin started successfully");

    server.serve(shutdown_signal()).await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    tokio::select! {
        _ = interrupt => tracing::info!(signal = "SIGINT", "Shutting down..."),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Shutting down..."),
    }
}
