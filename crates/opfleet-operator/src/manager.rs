//! # Operator Manager
//!
//! Process-level entry point: builds the cluster client, runs the controller,
//! and handles shutdown signals.

use crate::controller::TenantController;
use crate::error::Error;
use crate::OperatorConfig;
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Main operator manager
pub struct OperatorManager {
    config: OperatorConfig,
    client: Client,
}

impl OperatorManager {
    /// Create a new manager with a client from the ambient kubeconfig.
    pub async fn new(config: OperatorConfig) -> Result<Self, Error> {
        let client = Client::try_default().await?;
        Ok(Self { config, client })
    }

    /// Run the controller until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Error> {
        info!("starting opfleet operator v{}", env!("CARGO_PKG_VERSION"));

        let controller = TenantController::new(self.client.clone(), self.config.clone());
        let handle = tokio::spawn(async move {
            if let Err(err) = controller.run().await {
                error!(error = %err, "controller failed");
            }
        });

        wait_for_shutdown().await;
        info!("shutdown signal received, stopping operator");
        handle.abort();
        Ok(())
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

async fn wait_for_shutdown() {
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
