//! Discovery listener: connects to peers advertised on the local network.
//!
//! Each advertisement is handled in its own task, so a slow or failing dial
//! never holds up the next one. Discovery only establishes connections; it
//! does not open exchange streams.

use crate::error::WireError;
use crate::peer::PeerAddressInfo;
use crate::transport::TransportBinding;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DiscoveryListener {
    host: Arc<dyn TransportBinding>,
}

impl DiscoveryListener {
    pub fn new(host: Arc<dyn TransportBinding>) -> Self {
        Self { host }
    }

    /// Subscribe to advertisements and start connecting to each peer found.
    ///
    /// Fails when the transport cannot provide an advertisement channel. The
    /// returned task ends when the transport closes the channel.
    pub fn start(&self) -> Result<JoinHandle<()>, WireError> {
        let mut advertisements = self.host.subscribe_discovery()?;
        let host = Arc::clone(&self.host);
        let local = host.local_peer_id();

        Ok(tokio::spawn(async move {
            while let Some(peer) = advertisements.recv().await {
                if peer.peer_id == local {
                    continue;
                }
                info!(peer = %peer.peer_id, "Discovered new peer");
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    handle_peer_found(host.as_ref(), peer).await;
                });
            }
            debug!("Discovery channel closed");
        }))
    }
}

async fn handle_peer_found(host: &dyn TransportBinding, peer: PeerAddressInfo) {
    let peer_id = peer.peer_id;
    match host.connect(peer).await {
        Ok(()) => debug!(peer = %peer_id, "Connected to discovered peer"),
        Err(WireError::Closed) => debug!(peer = %peer_id, "Node closed before discovered peer was dialed"),
        Err(e) => warn!(peer = %peer_id, error = %e, "Error connecting to discovered peer"),
    }
}
