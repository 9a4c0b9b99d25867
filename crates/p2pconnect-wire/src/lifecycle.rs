//! Node lifecycle: startup order, waiting for shutdown, and teardown.
//!
//! Startup registers the protocol handler, then starts discovery, then dials
//! the explicitly supplied peer (if any). Any failure there is fatal. Once the
//! host exists it is always closed, whichever way `run` returns.

use crate::config::NodeConfig;
use crate::connector::ActiveConnector;
use crate::discovery::DiscoveryListener;
use crate::error::StartupError;
use crate::handler::ProtocolHandler;
use crate::registry::SessionRegistry;
use crate::transport::TransportBinding;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives one node from startup to teardown.
pub struct Lifecycle {
    host: Arc<dyn TransportBinding>,
    config: NodeConfig,
    registry: SessionRegistry,
}

impl Lifecycle {
    pub fn new(host: Arc<dyn TransportBinding>, config: NodeConfig) -> Self {
        Self {
            host,
            config,
            registry: SessionRegistry::new(),
        }
    }

    /// Sessions started by this node; subscribe here to observe outcomes.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start every component, wait for `shutdown`, then tear down.
    ///
    /// Returns early with an error if a startup step fails. The host is closed
    /// exactly once on every path.
    pub async fn run<F>(self, peer_address: Option<&str>, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        let result = self.serve(peer_address, shutdown).await;
        self.teardown().await;
        result
    }

    async fn serve<F>(&self, peer_address: Option<&str>, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        let handler = ProtocolHandler::new(self.config.protocol.clone(), self.registry.clone());
        self.host
            .set_stream_handler(self.config.protocol.clone(), Arc::new(handler))
            .map_err(StartupError::Handler)?;
        info!(protocol = %self.config.protocol, "Protocol handler registered");

        if self.config.enable_mdns {
            DiscoveryListener::new(Arc::clone(&self.host))
                .start()
                .map_err(StartupError::Discovery)?;
            info!(namespace = %self.config.namespace, "mDNS discovery started");
        }

        if let Some(address) = peer_address {
            let connector = ActiveConnector::from_config(
                Arc::clone(&self.host),
                self.registry.clone(),
                &self.config,
            );
            let stream_id = connector.connect(address).await?;
            info!(stream_id = %stream_id, "Exchange session started with supplied peer");
        }

        info!("Node running, waiting for shutdown signal");
        shutdown.await;
        info!("Shutdown signal received");
        Ok(())
    }

    async fn teardown(&self) {
        self.registry
            .shutdown(self.config.session_drain_timeout)
            .await;
        if let Err(e) = self.host.close().await {
            warn!(error = %e, "Error while closing node");
        }
        info!(
            sessions_completed = self.registry.completed_count(),
            "Node stopped"
        );
    }
}
