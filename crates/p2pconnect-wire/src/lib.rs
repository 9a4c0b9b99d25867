//! p2pconnect wire layer: LAN peer discovery and identity exchange.
//!
//! Nodes find each other over mDNS, connect over libp2p (TCP + Noise + Yamux),
//! and exchange a single [`IdentityRecord`] per direction on every stream
//! opened under the application protocol.
//!
//! ## Architecture
//!
//! - **Node**: libp2p swarm driven by its own event loop ([`TransportBinding`])
//! - **DiscoveryListener**: drains mDNS advertisements and dials the peers
//! - **ProtocolHandler**: accepts inbound streams and starts sessions
//! - **ActiveConnector**: dials a user-supplied address and opens a stream
//! - **ExchangeSession**: one-shot write/read of identity records
//! - **SessionRegistry**: owns running sessions and publishes their outcomes
//! - **lifecycle**: startup order, signal wait, and teardown

pub mod config;
pub mod connector;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod node;
pub mod peer;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{NodeConfig, DEFAULT_PROTOCOL, DISCOVERY_NAMESPACE};
pub use connector::ActiveConnector;
pub use discovery::DiscoveryListener;
pub use error::{ConnectError, StartupError, WireError};
pub use handler::ProtocolHandler;
pub use lifecycle::Lifecycle;
pub use message::IdentityRecord;
pub use node::Node;
pub use peer::{parse_peer_address, PeerAddressInfo, PeerStream, StreamDirection};
pub use registry::{SessionInfo, SessionRegistry};
pub use session::{ExchangeSession, SessionOutcome};
pub use transport::{StreamHandler, TransportBinding};

pub use libp2p::{Multiaddr, PeerId, StreamProtocol};
