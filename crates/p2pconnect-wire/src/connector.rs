//! Active connector: dials a user-supplied peer and opens an exchange stream.

use crate::config::NodeConfig;
use crate::error::{ConnectError, WireError};
use crate::peer::parse_peer_address;
use crate::registry::SessionRegistry;
use crate::transport::TransportBinding;
use libp2p::StreamProtocol;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct ActiveConnector {
    host: Arc<dyn TransportBinding>,
    registry: SessionRegistry,
    protocol: StreamProtocol,
    dial_timeout: Duration,
}

impl ActiveConnector {
    pub fn new(
        host: Arc<dyn TransportBinding>,
        registry: SessionRegistry,
        protocol: StreamProtocol,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            host,
            registry,
            protocol,
            dial_timeout,
        }
    }

    /// Connector using the protocol and dial timeout from `config`.
    pub fn from_config(
        host: Arc<dyn TransportBinding>,
        registry: SessionRegistry,
        config: &NodeConfig,
    ) -> Self {
        Self::new(host, registry, config.protocol.clone(), config.dial_timeout)
    }

    /// Connect to `address`, open a stream under the application protocol, and
    /// start an exchange session on it.
    ///
    /// Returns the new stream's identifier. The session itself runs in the
    /// background; only connection setup is awaited here.
    pub async fn connect(&self, address: &str) -> Result<String, ConnectError> {
        let info = parse_peer_address(address).map_err(ConnectError::MalformedAddress)?;
        let peer = info.peer_id;

        info!(peer = %info, "Connecting to peer");
        match tokio::time::timeout(self.dial_timeout, self.host.connect(info)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectError::Connection(e)),
            Err(_) => return Err(ConnectError::Connection(WireError::DialTimeout { peer })),
        }

        info!(peer = %peer, protocol = %self.protocol, "Connected to peer, opening stream");
        let stream = self
            .host
            .open_stream(peer, self.protocol.clone())
            .await
            .map_err(ConnectError::StreamOpen)?;

        Ok(self.registry.spawn(stream))
    }
}
