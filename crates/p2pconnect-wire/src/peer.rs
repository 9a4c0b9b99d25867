//! Peer addressing and the stream handle sessions run on.

use crate::error::WireError;
use futures::{AsyncRead, AsyncWrite};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A peer's identity plus the addresses it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddressInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerAddressInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }
}

impl fmt::Display for PeerAddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.peer_id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{addr}")?;
        }
        write!(f, "]")
    }
}

/// Parse `<multiaddr>/p2p/<peer-id>` into a [`PeerAddressInfo`].
///
/// The `/p2p/` component is stripped from the dial address. An address made
/// of only `/p2p/<peer-id>` yields an empty address list.
pub fn parse_peer_address(address: &str) -> Result<PeerAddressInfo, WireError> {
    let invalid = |reason: String| WireError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let multiaddr: Multiaddr = address
        .trim()
        .parse()
        .map_err(|e| invalid(format!("{e}")))?;

    let mut dial_addr = Multiaddr::empty();
    let mut peer_id = None;
    for component in multiaddr.iter() {
        match component {
            Protocol::P2p(id) => {
                if peer_id.replace(id).is_some() {
                    return Err(invalid("more than one /p2p/ component".into()));
                }
            }
            other => dial_addr.push(other),
        }
    }

    let peer_id = peer_id.ok_or_else(|| invalid("missing /p2p/<peer-id> component".into()))?;
    let addrs = if dial_addr.is_empty() {
        Vec::new()
    } else {
        vec![dial_addr]
    };
    Ok(PeerAddressInfo::new(peer_id, addrs))
}

/// Append `/p2p/<peer_id>` to a listen address, the form other nodes dial.
pub fn with_peer_id(addr: &Multiaddr, peer_id: PeerId) -> Multiaddr {
    addr.clone().with(Protocol::P2p(peer_id))
}

/// Which side opened a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// The remote peer opened it; delivered through the protocol handler.
    Inbound,
    /// We opened it through the active connector.
    Outbound,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// Byte channel a [`PeerStream`] wraps.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> StreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A negotiated, bidirectional stream to one peer.
///
/// Every stream gets a fresh identifier when it is accepted or opened; that
/// identifier is what the exchange session sends as its identity record.
pub struct PeerStream {
    id: String,
    peer: PeerId,
    protocol: StreamProtocol,
    direction: StreamDirection,
    io: Box<dyn StreamIo>,
}

impl PeerStream {
    pub fn new(
        peer: PeerId,
        protocol: StreamProtocol,
        direction: StreamDirection,
        io: impl StreamIo,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer,
            protocol,
            direction,
            io: Box::new(io),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn protocol(&self) -> &StreamProtocol {
        &self.protocol
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }
}

impl fmt::Debug for PeerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerStream")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for PeerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for PeerStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.io).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.io).poll_close(cx)
    }
}
