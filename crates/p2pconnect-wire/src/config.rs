//! Node configuration with defaults.
//!
//! There is no config file: the binary always runs with [`NodeConfig::default`]
//! and tests build their own values.

use crate::error::WireError;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, StreamProtocol};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Application protocol every exchange stream is negotiated under.
pub const DEFAULT_PROTOCOL: StreamProtocol = StreamProtocol::new("/p2pconnect");

/// Namespace shared by all cooperating nodes on the LAN.
pub const DISCOVERY_NAMESPACE: &str = "p2pconnect";

/// Port the node listens on when nothing else is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Configuration for a [`Node`](crate::node::Node) and the components around it.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Addresses to listen on.
    pub listen_addrs: Vec<Multiaddr>,
    /// Protocol identifier for exchange streams.
    pub protocol: StreamProtocol,
    /// Discovery namespace. Peers found via mDNS that advertise another
    /// namespace are disconnected.
    pub namespace: String,
    /// Whether to run mDNS discovery.
    pub enable_mdns: bool,
    /// How long a connection without open streams stays up.
    pub idle_connection_timeout: Duration,
    /// Upper bound for an explicitly requested dial.
    pub dial_timeout: Duration,
    /// How long startup waits for the first listen address.
    pub listen_timeout: Duration,
    /// Quiet period after the first listen address. Startup returns once no
    /// further address has come up for this long.
    pub listen_settle: Duration,
    /// How long shutdown waits for running sessions before aborting them.
    pub session_drain_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![Multiaddr::empty()
                .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
                .with(Protocol::Tcp(DEFAULT_LISTEN_PORT))],
            protocol: DEFAULT_PROTOCOL,
            namespace: DISCOVERY_NAMESPACE.to_string(),
            enable_mdns: true,
            idle_connection_timeout: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(20),
            listen_timeout: Duration::from_secs(5),
            listen_settle: Duration::from_millis(250),
            session_drain_timeout: Duration::from_secs(5),
        }
    }
}

impl NodeConfig {
    /// Ephemeral loopback port, no mDNS. Used for local multi-node setups.
    pub fn loopback() -> Self {
        Self {
            listen_addrs: vec![Multiaddr::empty()
                .with(Protocol::Ip4(Ipv4Addr::LOCALHOST))
                .with(Protocol::Tcp(0))],
            enable_mdns: false,
            ..Self::default()
        }
    }

    /// Reject configurations the node cannot start with.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.listen_addrs.is_empty() {
            return Err(WireError::Config(
                "at least one listen address is required".into(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(WireError::Config("namespace must not be empty".into()));
        }
        Ok(())
    }

    /// Identify `protocol_version` string carrying the discovery namespace.
    pub fn identify_protocol_version(&self) -> String {
        format!("/{}/id/1.0.0", self.namespace)
    }
}
