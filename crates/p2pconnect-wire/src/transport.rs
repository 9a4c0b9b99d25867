//! The transport binding the rest of the crate is written against.
//!
//! [`Node`](crate::node::Node) is the libp2p implementation; tests swap in an
//! in-memory one.

use crate::error::WireResult;
use crate::peer::{with_peer_id, PeerAddressInfo, PeerStream};
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback for streams a remote peer opened under a registered protocol.
///
/// Called from the transport's accept task, possibly for many streams at
/// once. Implementations must hand the stream off and return immediately.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle_stream(&self, stream: PeerStream);
}

/// A local network identity with listen addresses, able to dial peers and
/// open or accept protocol streams.
///
/// The identity and listen addresses are fixed once the binding is up and may
/// be read from any task.
#[async_trait]
pub trait TransportBinding: Send + Sync + 'static {
    /// This node's peer identity.
    fn local_peer_id(&self) -> PeerId;

    /// Addresses the node is currently listening on.
    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Listen addresses with `/p2p/<peer-id>` appended, ready to hand to
    /// another node.
    fn p2p_addrs(&self) -> Vec<Multiaddr> {
        let peer_id = self.local_peer_id();
        self.listen_addrs()
            .iter()
            .map(|addr| with_peer_id(addr, peer_id))
            .collect()
    }

    /// Establish (or reuse) a connection to a peer.
    async fn connect(&self, peer: PeerAddressInfo) -> WireResult<()>;

    /// Open an outbound stream to a connected peer under `protocol`.
    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> WireResult<PeerStream>;

    /// Route every inbound stream negotiated under `protocol` to `handler`.
    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: Arc<dyn StreamHandler>,
    ) -> WireResult<()>;

    /// Take the channel of local-network peer advertisements.
    ///
    /// Fails when discovery is disabled or the channel was already taken.
    fn subscribe_discovery(&self) -> WireResult<mpsc::UnboundedReceiver<PeerAddressInfo>>;

    /// Close every connection and stop the transport. Safe to call twice.
    async fn close(&self) -> WireResult<()>;
}
