//! Error types for the wire layer.

use libp2p::{Multiaddr, PeerId};
use thiserror::Error;

/// Errors from the transport, codec, and discovery layers.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Stream closed")]
    StreamClosed,
    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: u32, max: u32 },
    #[error("Invalid peer address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to listen on {addr}: {reason}")]
    Listen { addr: Multiaddr, reason: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Discovery error: {0}")]
    Discovery(String),
    #[error("Dial to {peer} failed: {reason}")]
    Dial { peer: PeerId, reason: String },
    #[error("Dial to {peer} timed out")]
    DialTimeout { peer: PeerId },
    #[error("Failed to open stream to {peer}: {reason}")]
    StreamOpen { peer: PeerId, reason: String },
    #[error("A handler is already registered for protocol {0}")]
    HandlerAlreadyRegistered(String),
    #[error("Node is shut down")]
    Closed,
}

/// Failures of an explicitly requested peer connection.
///
/// Every variant is fatal at startup: the user asked for this peer and
/// expects a definite answer.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Malformed peer address: {0}")]
    MalformedAddress(WireError),
    #[error("Connection error: {0}")]
    Connection(WireError),
    #[error("Stream open error: {0}")]
    StreamOpen(WireError),
}

/// Fatal errors raised while bringing a node up.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The transport binding could not be created (e.g. listen address in use).
    #[error("Node startup failed: {0}")]
    Node(WireError),

    /// The protocol handler could not be registered.
    #[error("Protocol handler registration failed: {0}")]
    Handler(WireError),

    /// The discovery subscription could not be set up.
    #[error("Discovery startup failed: {0}")]
    Discovery(WireError),

    /// The explicitly supplied peer could not be reached.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl StartupError {
    /// Classify a failure from bringing the node itself up.
    ///
    /// mDNS is set up inside node startup, so its failures are reported as
    /// discovery errors rather than node errors.
    pub fn from_node(err: WireError) -> Self {
        match err {
            WireError::Discovery(_) => StartupError::Discovery(err),
            other => StartupError::Node(other),
        }
    }
}

/// Alias for wire-layer results.
pub type WireResult<T> = Result<T, WireError>;
