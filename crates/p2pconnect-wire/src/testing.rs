//! In-memory stand-ins for the transport, shared by unit tests.

use crate::error::{WireError, WireResult};
use crate::message::{encode_record, IdentityRecord};
use crate::peer::{PeerAddressInfo, PeerStream, StreamDirection};
use crate::transport::{StreamHandler, TransportBinding};
use async_trait::async_trait;
use futures::io::Cursor;
use futures::{AsyncRead, AsyncWrite};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// A stream whose read side replays fixed bytes and whose write side records
/// everything written.
pub struct MemoryStream {
    inbound: Cursor<Vec<u8>>,
    /// Never reach EOF; reads stay pending once the bytes are consumed.
    silent: bool,
    fail_writes: bool,
    outbound: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStream {
    fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            inbound: Cursor::new(bytes),
            silent: false,
            fail_writes: false,
            outbound: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reads hit EOF immediately.
    pub fn empty() -> Self {
        Self::with_bytes(Vec::new())
    }

    /// Reads yield one encoded record, then EOF.
    pub fn with_record(record: &IdentityRecord) -> Self {
        Self::with_bytes(encode_record(record).unwrap())
    }

    /// Reads never complete.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::empty()
        }
    }

    /// Every write fails with a broken pipe.
    pub fn broken_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.outbound)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let remaining = self.inbound.get_ref().len() as u64 - self.inbound.position();
        if self.silent && remaining == 0 {
            return Poll::Pending;
        }
        Pin::new(&mut self.inbound).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken stream")));
        }
        self.outbound.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Wrap a memory stream as a stream from `peer`.
pub fn peer_stream(peer: PeerId, direction: StreamDirection, io: MemoryStream) -> PeerStream {
    PeerStream::new(peer, crate::DEFAULT_PROTOCOL, direction, io)
}

/// A transport binding that never touches the network.
pub struct FakeHost {
    peer_id: PeerId,
    fail_connects: AtomicUsize,
    fail_open: bool,
    stall_connects: bool,
    connects: Mutex<Vec<PeerAddressInfo>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    handler: Mutex<Option<(StreamProtocol, Arc<dyn StreamHandler>)>>,
    discovery: Mutex<Option<mpsc::UnboundedReceiver<PeerAddressInfo>>>,
    discovery_tx: mpsc::UnboundedSender<PeerAddressInfo>,
    remote_record: IdentityRecord,
}

impl FakeHost {
    pub fn new() -> Self {
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        Self {
            peer_id: PeerId::random(),
            fail_connects: AtomicUsize::new(0),
            fail_open: false,
            stall_connects: false,
            connects: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            handler: Mutex::new(None),
            discovery: Mutex::new(Some(discovery_rx)),
            discovery_tx,
            remote_record: IdentityRecord::new("remote-stream"),
        }
    }

    /// The first `n` connects fail.
    pub fn failing_connects(self, n: usize) -> Self {
        self.fail_connects.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Connects never complete, like a dial to a black-holed address.
    pub fn stalling_connects(mut self) -> Self {
        self.stall_connects = true;
        self
    }

    /// Sender side of the discovery channel, standing in for mDNS.
    pub fn advertiser(&self) -> mpsc::UnboundedSender<PeerAddressInfo> {
        self.discovery_tx.clone()
    }

    pub fn connects(&self) -> Vec<PeerAddressInfo> {
        self.connects.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn remote_record(&self) -> &IdentityRecord {
        &self.remote_record
    }

    pub fn registered_protocol(&self) -> Option<StreamProtocol> {
        self.handler.lock().unwrap().as_ref().map(|(p, _)| p.clone())
    }

    /// Deliver a stream to the registered handler as if a peer opened it.
    pub fn deliver_inbound(&self, stream: PeerStream) {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, h)| Arc::clone(h))
            .expect("no stream handler registered");
        handler.handle_stream(stream);
    }

    /// Poll until `n` connects were attempted.
    pub async fn wait_for_connects(&self, n: usize) -> Vec<PeerAddressInfo> {
        for _ in 0..200 {
            let connects = self.connects();
            if connects.len() >= n {
                return connects;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} connect attempts, saw {}", self.connects().len());
    }
}

#[async_trait]
impl TransportBinding for FakeHost {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        vec!["/ip4/127.0.0.1/tcp/8080".parse().unwrap()]
    }

    async fn connect(&self, peer: PeerAddressInfo) -> WireResult<()> {
        let peer_id = peer.peer_id;
        self.connects.lock().unwrap().push(peer);
        if self.stall_connects {
            std::future::pending::<()>().await;
        }
        let failed = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(WireError::Dial {
                peer: peer_id,
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> WireResult<PeerStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(WireError::StreamOpen {
                peer,
                reason: format!("protocol {protocol} not supported"),
            });
        }
        Ok(PeerStream::new(
            peer,
            protocol,
            StreamDirection::Outbound,
            MemoryStream::with_record(&self.remote_record),
        ))
    }

    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: Arc<dyn StreamHandler>,
    ) -> WireResult<()> {
        let mut slot = self.handler.lock().unwrap();
        if slot.is_some() {
            return Err(WireError::HandlerAlreadyRegistered(protocol.to_string()));
        }
        *slot = Some((protocol, handler));
        Ok(())
    }

    fn subscribe_discovery(&self) -> WireResult<mpsc::UnboundedReceiver<PeerAddressInfo>> {
        self.discovery
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| WireError::Discovery("already subscribed".into()))
    }

    async fn close(&self) -> WireResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
