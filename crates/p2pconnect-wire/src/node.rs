//! libp2p node: the production [`TransportBinding`].
//!
//! The swarm (TCP + Noise + Yamux, identify, optional mDNS, and the stream
//! behaviour) is owned by a single event-loop task. Everything else talks to
//! it through a command channel, a watch of listen addresses, or a
//! [`libp2p_stream::Control`] for opening and accepting streams.

use crate::config::NodeConfig;
use crate::error::{WireError, WireResult};
use crate::peer::{PeerAddressInfo, PeerStream, StreamDirection};
use crate::transport::{StreamHandler, TransportBinding};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, identity, mdns, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(NetworkBehaviour)]
struct NodeBehaviour {
    stream: libp2p_stream::Behaviour,
    identify: identify::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
}

type DialReply = oneshot::Sender<Result<(), String>>;

enum Command {
    Dial { peer: PeerAddressInfo, reply: DialReply },
    Shutdown,
}

/// A running libp2p node.
pub struct Node {
    local_peer_id: PeerId,
    listen_addrs: watch::Receiver<Vec<Multiaddr>>,
    commands: mpsc::UnboundedSender<Command>,
    control: libp2p_stream::Control,
    mdns_enabled: bool,
    discovery: Mutex<Option<mpsc::UnboundedReceiver<PeerAddressInfo>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Node {
    /// Create the identity, bind the listen addresses, and start the swarm.
    ///
    /// Returns once at least one listen address is active and no further
    /// address has arrived for `listen_settle`. Fails when the
    /// configuration is invalid, the transport cannot be built, mDNS cannot
    /// start, or no address comes up within `listen_timeout`.
    pub async fn start(config: NodeConfig) -> WireResult<Arc<Self>> {
        config.validate()?;

        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = keypair.public().to_peer_id();

        let mut swarm = build_swarm(keypair, &config)?;
        for addr in &config.listen_addrs {
            swarm.listen_on(addr.clone()).map_err(|e| WireError::Listen {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        }

        let control = swarm.behaviour().stream.new_control();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (addrs_tx, mut addrs_rx) = watch::channel(Vec::new());

        let event_loop = EventLoop {
            swarm,
            commands: command_rx,
            pending_dials: HashMap::new(),
            mdns_peers: HashSet::new(),
            rejected: HashSet::new(),
            discovery: discovery_tx,
            listen_addrs: addrs_tx,
            identify_version: config.identify_protocol_version(),
        };
        let handle = tokio::spawn(event_loop.run());

        let ready = match tokio::time::timeout(
            config.listen_timeout,
            addrs_rx.wait_for(|addrs| !addrs.is_empty()),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(WireError::Transport(
                "swarm stopped before it started listening".into(),
            )),
            Err(_) => Err(WireError::Listen {
                addr: config.listen_addrs[0].clone(),
                reason: format!("no listen address came up within {:?}", config.listen_timeout),
            }),
        };
        if let Err(e) = ready {
            handle.abort();
            return Err(e);
        }
        // An unspecified address comes up one interface at a time.
        let _ = tokio::time::timeout(
            config.listen_timeout,
            settle_listen_addrs(&mut addrs_rx, config.listen_settle),
        )
        .await;

        info!(
            peer_id = %local_peer_id,
            addrs = ?addrs_rx.borrow().as_slice(),
            mdns = config.enable_mdns,
            "Node started"
        );

        Ok(Arc::new(Self {
            local_peer_id,
            listen_addrs: addrs_rx,
            commands: command_tx,
            control,
            mdns_enabled: config.enable_mdns,
            discovery: Mutex::new(Some(discovery_rx)),
            event_loop: Mutex::new(Some(handle)),
            accept_tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wait until the listen addresses have not changed for `quiet`.
async fn settle_listen_addrs(addrs: &mut watch::Receiver<Vec<Multiaddr>>, quiet: Duration) {
    while let Ok(Ok(())) = tokio::time::timeout(quiet, addrs.changed()).await {
        debug!(addrs = ?addrs.borrow().as_slice(), "Listen addresses updated");
    }
}

fn build_swarm(keypair: identity::Keypair, config: &NodeConfig) -> WireResult<Swarm<NodeBehaviour>> {
    let local_peer_id = keypair.public().to_peer_id();
    let mdns = if config.enable_mdns {
        let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
            .map_err(|e| WireError::Discovery(format!("failed to start mDNS: {e}")))?;
        Some(behaviour)
    } else {
        None
    };
    let identify_version = config.identify_protocol_version();
    let idle_timeout = config.idle_connection_timeout;

    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| WireError::Transport(format!("failed to configure TCP transport: {e}")))?
        .with_behaviour(move |key| NodeBehaviour {
            stream: libp2p_stream::Behaviour::new(),
            identify: identify::Behaviour::new(
                identify::Config::new(identify_version, key.public())
                    .with_agent_version(format!("p2pconnect/{}", env!("CARGO_PKG_VERSION"))),
            ),
            mdns: Toggle::from(mdns),
        })
        .map_err(|e| WireError::Transport(format!("failed to build behaviour: {e}")))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
        .build();

    Ok(swarm)
}

struct EventLoop {
    swarm: Swarm<NodeBehaviour>,
    commands: mpsc::UnboundedReceiver<Command>,
    pending_dials: HashMap<PeerId, Vec<DialReply>>,
    /// Peers that reached us through mDNS, subject to the namespace check.
    mdns_peers: HashSet<PeerId>,
    /// mDNS peers from another namespace; their advertisements are ignored.
    rejected: HashSet<PeerId>,
    discovery: mpsc::UnboundedSender<PeerAddressInfo>,
    listen_addrs: watch::Sender<Vec<Multiaddr>>,
    identify_version: String,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Dial { peer, reply }) => self.handle_dial(peer, reply),
                    Some(Command::Shutdown) | None => break,
                },
            }
        }
        for (_, waiters) in self.pending_dials.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err("node shut down".into()));
            }
        }
        debug!("Swarm event loop stopped");
    }

    fn handle_dial(&mut self, peer: PeerAddressInfo, reply: DialReply) {
        let peer_id = peer.peer_id;
        if self.swarm.is_connected(&peer_id) {
            let _ = reply.send(Ok(()));
            return;
        }
        if let Some(waiters) = self.pending_dials.get_mut(&peer_id) {
            waiters.push(reply);
            return;
        }

        debug!(peer = %peer, "Dialing");
        let opts = DialOpts::peer_id(peer_id).addresses(peer.addrs).build();
        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(peer_id, vec![reply]);
            }
            Err(e) => {
                let _ = reply.send(Err(e.to_string()));
            }
        }
    }

    fn resolve_dial(&mut self, peer_id: PeerId, result: Result<(), String>) {
        if let Some(waiters) = self.pending_dials.remove(&peer_id) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Listening");
                self.listen_addrs.send_modify(|addrs| addrs.push(address));
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                debug!(%address, "Listen address expired");
                self.listen_addrs
                    .send_modify(|addrs| addrs.retain(|a| a != &address));
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!(%error, "Listener error");
            }
            SwarmEvent::ListenerClosed { addresses, reason, .. } => {
                debug!(?addresses, ?reason, "Listener closed");
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                info!(
                    peer = %peer_id,
                    addr = %endpoint.get_remote_address(),
                    "Connection established"
                );
                self.resolve_dial(peer_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(peer = %peer_id, ?cause, "Connection closed");
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if self.swarm.is_connected(&peer_id) {
                    self.resolve_dial(peer_id, Ok(()));
                } else {
                    debug!(peer = %peer_id, %error, "Outgoing connection failed");
                    self.resolve_dial(peer_id, Err(error.to_string()));
                }
            }
            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                debug!(addr = %send_back_addr, %error, "Incoming connection failed");
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(event)) => self.handle_mdns_event(event),
            SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(event)) => {
                self.handle_identify_event(event)
            }
            _ => {}
        }
    }

    fn handle_mdns_event(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(found) => {
                let mut by_peer: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in found {
                    by_peer.entry(peer_id).or_default().push(addr);
                }
                for (peer_id, addrs) in by_peer {
                    if self.rejected.contains(&peer_id) {
                        continue;
                    }
                    self.mdns_peers.insert(peer_id);
                    // The receiver is gone once nobody listens for discovery.
                    let _ = self.discovery.send(PeerAddressInfo::new(peer_id, addrs));
                }
            }
            mdns::Event::Expired(expired) => {
                for (peer_id, addr) in expired {
                    debug!(peer = %peer_id, %addr, "mDNS record expired");
                }
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            if self.mdns_peers.contains(&peer_id) && info.protocol_version != self.identify_version {
                info!(
                    peer = %peer_id,
                    theirs = %info.protocol_version,
                    ours = %self.identify_version,
                    "Peer belongs to another discovery namespace, disconnecting"
                );
                self.rejected.insert(peer_id);
                let _ = self.swarm.disconnect_peer_id(peer_id);
            }
        }
    }
}

#[async_trait]
impl TransportBinding for Node {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.borrow().clone()
    }

    async fn connect(&self, peer: PeerAddressInfo) -> WireResult<()> {
        if self.is_closed() {
            return Err(WireError::Closed);
        }
        let peer_id = peer.peer_id;
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Dial { peer, reply })
            .map_err(|_| WireError::Closed)?;
        result
            .await
            .map_err(|_| WireError::Closed)?
            .map_err(|reason| WireError::Dial {
                peer: peer_id,
                reason,
            })
    }

    async fn open_stream(&self, peer: PeerId, protocol: StreamProtocol) -> WireResult<PeerStream> {
        if self.is_closed() {
            return Err(WireError::Closed);
        }
        let mut control = self.control.clone();
        let stream = control
            .open_stream(peer, protocol.clone())
            .await
            .map_err(|e| WireError::StreamOpen {
                peer,
                reason: e.to_string(),
            })?;
        debug!(peer = %peer, %protocol, "Opened outbound stream");
        Ok(PeerStream::new(peer, protocol, StreamDirection::Outbound, stream))
    }

    fn set_stream_handler(
        &self,
        protocol: StreamProtocol,
        handler: Arc<dyn StreamHandler>,
    ) -> WireResult<()> {
        let mut control = self.control.clone();
        let mut incoming = control
            .accept(protocol.clone())
            .map_err(|_| WireError::HandlerAlreadyRegistered(protocol.to_string()))?;

        let task = tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                debug!(peer = %peer, %protocol, "Accepted inbound stream");
                handler.handle_stream(PeerStream::new(
                    peer,
                    protocol.clone(),
                    StreamDirection::Inbound,
                    stream,
                ));
            }
        });
        self.accept_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        Ok(())
    }

    fn subscribe_discovery(&self) -> WireResult<mpsc::UnboundedReceiver<PeerAddressInfo>> {
        if !self.mdns_enabled {
            return Err(WireError::Discovery("mDNS is disabled".into()));
        }
        self.discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| WireError::Discovery("discovery channel already taken".into()))
    }

    async fn close(&self) -> WireResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let accept_tasks: Vec<_> = self
            .accept_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in accept_tasks {
            task.abort();
        }

        let _ = self.commands.send(Command::Shutdown);
        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = event_loop {
            handle
                .await
                .map_err(|e| WireError::Transport(format!("event loop task failed: {e}")))?;
        }

        info!(peer_id = %self.local_peer_id, "Node closed");
        Ok(())
    }
}
