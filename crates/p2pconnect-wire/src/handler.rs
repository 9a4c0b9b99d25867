//! Protocol handler: turns inbound streams into exchange sessions.

use crate::peer::PeerStream;
use crate::registry::SessionRegistry;
use crate::transport::StreamHandler;
use libp2p::StreamProtocol;
use tracing::{debug, warn};

/// Registered with the transport for the application protocol. Every inbound
/// stream gets its own session; the handler itself never blocks.
pub struct ProtocolHandler {
    protocol: StreamProtocol,
    registry: SessionRegistry,
}

impl ProtocolHandler {
    pub fn new(protocol: StreamProtocol, registry: SessionRegistry) -> Self {
        Self { protocol, registry }
    }

    pub fn protocol(&self) -> &StreamProtocol {
        &self.protocol
    }
}

impl StreamHandler for ProtocolHandler {
    fn handle_stream(&self, stream: PeerStream) {
        if stream.protocol() != &self.protocol {
            warn!(
                peer = %stream.peer(),
                protocol = %stream.protocol(),
                expected = %self.protocol,
                "Dropping stream for unexpected protocol"
            );
            return;
        }
        debug!(peer = %stream.peer(), stream_id = %stream.id(), "Inbound stream accepted");
        self.registry.spawn(stream);
    }
}
