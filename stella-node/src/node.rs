//! Node lifecycle
//!
//! A node assembles an identity, the reliable UDP transport, the
//! switch and peer discovery, and owns the periodic maintenance
//! tasks. Remote peers appear as switch ports whose egress sink wraps
//! frames in FRAME-verb packets and hands them to the transport;
//! inbound FRAME packets re-enter the switch through the peer's port.
//! WHOIS/OK exchanges populate a cache of learned identities.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use stella_protocol::{
    is_fragment_bytes, split_packet, Address, Fragment, FragmentAssembler, Identity, Packet, Verb,
    ADDRESS_LENGTH,
};
use stella_switch::{Port, PortState, Switch, VlanMode};
use stella_transport::{
    is_discovery_message, DatagramSender, DiscoveryManager, RecvHandler, ReliableUdpTransport,
    TransportConfig,
};

use crate::event::{EventHandler, LoggingEventHandler, NodeEvent, NodeStats};
use crate::{Error, NodeConfig, Result};

/// Largest datagram we hand the transport before fragmenting
const TUNNEL_MTU: usize = 1400;

/// Partial packets older than this are dropped by the main loop
const FRAGMENT_MAX_AGE: Duration = Duration::from_secs(30);

/// Socket bind attempts before startup fails
const BIND_ATTEMPTS: u32 = 5;

const MAC_AGING_TICK: Duration = Duration::from_secs(30);
const MULTICAST_AGING_TICK: Duration = Duration::from_secs(60);
const MAIN_LOOP_TICK: Duration = Duration::from_secs(5);

/// Node lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Everything that only exists while the node runs
struct RunningNode {
    transport: Arc<ReliableUdpTransport>,
    switch: Arc<Switch>,
    discovery: Arc<DiscoveryManager>,
    router: Arc<Router>,
    started_at: Instant,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// A Stella node
pub struct Node {
    config: NodeConfig,
    identity: Identity,
    state: RwLock<NodeState>,
    events: Arc<dyn EventHandler>,
    running: tokio::sync::Mutex<Option<RunningNode>>,
}

impl Node {
    /// Create a node, loading or generating its identity
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_event_handler(config, Arc::new(LoggingEventHandler))
    }

    /// Create a node that reports through the given event handler
    pub fn with_event_handler(config: NodeConfig, events: Arc<dyn EventHandler>) -> Result<Self> {
        config.validate()?;
        let identity = load_or_generate_identity(&config.identity_file)?;

        let mut config = config;
        if config.node_id.is_empty() {
            config.node_id = identity.address().to_hex();
        }

        Ok(Self {
            config,
            identity,
            state: RwLock::new(NodeState::Stopped),
            events,
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// The node's identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The node's address
    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// The configuration the node was built from
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        *self.state.read().unwrap()
    }

    /// True while the node is serving traffic
    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    async fn set_state(&self, new: NodeState) {
        let old = {
            let mut state = self.state.write().unwrap();
            std::mem::replace(&mut *state, new)
        };
        if old != new {
            self.events.on_event(NodeEvent::StateChanged { old, new }).await;
        }
    }

    /// Start the node: bind the transport, start the switch and
    /// discovery, spawn the maintenance tasks
    pub async fn start(&self) -> Result<()> {
        if self.state() != NodeState::Stopped {
            return Err(Error::InvalidState(format!(
                "cannot start from {:?}",
                self.state()
            )));
        }
        self.set_state(NodeState::Starting).await;
        info!(node = %self.config.node_id, "starting node");

        match self.start_inner().await {
            Ok(()) => {
                self.set_state(NodeState::Running).await;
                info!(node = %self.config.node_id, "node running");
                Ok(())
            }
            Err(e) => {
                self.events
                    .on_event(NodeEvent::Error {
                        message: e.to_string(),
                        recoverable: false,
                    })
                    .await;
                self.set_state(NodeState::Error).await;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<()> {
        let switch = Arc::new(Switch::new(
            self.config.node_id.clone(),
            format!("stella-{}", self.config.node_id),
        )?);
        switch.start()?;

        let (bind_addr, bind_port) = self.config.bind_socket_addr()?;
        let transport_config = TransportConfig {
            addr: bind_addr,
            port: bind_port,
            test_mode: self.config.test_mode,
            ..Default::default()
        };
        let transport = Arc::new(ReliableUdpTransport::new(
            transport_config,
            self.identity.clone(),
        ));

        let discovery = Arc::new(DiscoveryManager::new(
            self.identity.clone(),
            Arc::clone(&transport) as Arc<dyn DatagramSender>,
        ));

        let router = Arc::new(Router {
            identity: self.identity.clone(),
            transport: Arc::clone(&transport),
            switch: Arc::clone(&switch),
            discovery: Arc::clone(&discovery),
            peer_ports: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
            assembler: Mutex::new(FragmentAssembler::new()),
            events: Arc::clone(&self.events),
        });

        self.bind_transport(&transport, router.clone().into_handler())
            .await?;
        discovery.start()?;

        let (shutdown, _) = broadcast::channel(1);
        let started_at = Instant::now();
        let tasks = spawn_maintenance(
            &router,
            Arc::clone(&self.events),
            started_at,
            &shutdown,
        );

        *self.running.lock().await = Some(RunningNode {
            transport,
            switch,
            discovery,
            router,
            started_at,
            shutdown,
            tasks,
        });
        Ok(())
    }

    /// Bind with retries; transient bind failures happen when a
    /// previous instance's socket lingers
    async fn bind_transport(
        &self,
        transport: &Arc<ReliableUdpTransport>,
        handler: RecvHandler,
    ) -> Result<()> {
        let mut last_reason = String::new();
        for attempt in 1..=BIND_ATTEMPTS {
            match transport.start(Arc::clone(&handler)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "bind failed");
                    last_reason = e.to_string();
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        Err(Error::BindFailed {
            attempts: BIND_ATTEMPTS,
            reason: last_reason,
        })
    }

    /// Stop the node: cancel tasks, await their exit, stop discovery,
    /// transport and switch
    pub async fn stop(&self) -> Result<()> {
        if self.state() != NodeState::Running {
            return Err(Error::InvalidState(format!(
                "cannot stop from {:?}",
                self.state()
            )));
        }
        self.set_state(NodeState::Stopping).await;
        info!(node = %self.config.node_id, "stopping node");

        if let Some(mut running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            for task in running.tasks.drain(..) {
                let _ = task.await;
            }
            running.discovery.stop().await;
            running.transport.stop().await;
            running.switch.stop()?;
        }

        self.set_state(NodeState::Stopped).await;
        info!(node = %self.config.node_id, "node stopped");
        Ok(())
    }

    /// Tear down without draining tasks
    pub async fn force_stop(&self) {
        if let Some(running) = self.running.lock().await.take() {
            let _ = running.shutdown.send(());
            for task in &running.tasks {
                task.abort();
            }
            running.transport.stop().await;
            let _ = running.switch.stop();
        }
        self.set_state(NodeState::Stopped).await;
    }

    /// Connect a remote peer: register its key, create its tunnel
    /// port and start talking to it
    ///
    /// Returns the ID of the switch port representing the peer. The
    /// port is a wildcard trunk so every VLAN crosses the tunnel.
    pub async fn connect_peer(&self, addr: SocketAddr, peer: Identity) -> Result<String> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("node is not running".to_string()))?;

        peer.validate()?;
        running.transport.set_peer_public_key(addr, *peer.public_key());

        let port_id = format!("peer-{}", peer.address().to_hex());
        let mut port = Port::new(port_id.clone(), format!("tunnel to {}", peer.address()));
        port.state = PortState::Up;
        port.vlan_mode = VlanMode::Trunk;
        port.native_vlan = 1;
        port.set_sink(peer_egress_sink(
            Arc::clone(&running.transport),
            addr,
            peer.address(),
            self.identity.address(),
        ));
        running.switch.add_port(port)?;
        running
            .router
            .peer_ports
            .write()
            .unwrap()
            .insert(addr, port_id.clone());
        running
            .router
            .identities
            .write()
            .unwrap()
            .insert(peer.address(), peer.clone());

        self.events
            .on_event(NodeEvent::PeerConnected {
                address: peer.address(),
                addr,
            })
            .await;
        Ok(port_id)
    }

    /// Disconnect a peer, removing its tunnel port
    pub async fn disconnect_peer(&self, addr: SocketAddr) -> Result<()> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("node is not running".to_string()))?;

        let port_id = running
            .router
            .peer_ports
            .write()
            .unwrap()
            .remove(&addr)
            .ok_or(Error::UnknownPeer(addr))?;
        running.switch.remove_port(&port_id)?;

        self.events.on_event(NodeEvent::PeerDisconnected { addr }).await;
        Ok(())
    }

    /// Add a local port (e.g. the TUN/TAP attachment); the caller
    /// pre-installs the egress sink
    pub async fn add_local_port(&self, port: Port) -> Result<()> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("node is not running".to_string()))?;
        running.switch.add_port(port)?;
        Ok(())
    }

    /// Ingress entry point for local frame sources
    pub async fn handle_local_frame(&self, port_id: &str, frame: &[u8]) -> Result<()> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("node is not running".to_string()))?;
        running.switch.handle_frame(port_id, frame)?;
        Ok(())
    }

    /// Ask the node at `addr` who `address` is (WHOIS)
    ///
    /// The answer arrives asynchronously and lands in the identity
    /// cache; see [`lookup_identity`](Self::lookup_identity).
    pub async fn request_identity(&self, addr: SocketAddr, address: Address) -> Result<()> {
        let guard = self.running.lock().await;
        let running = guard
            .as_ref()
            .ok_or_else(|| Error::InvalidState("node is not running".to_string()))?;

        let mut packet = Packet::new(address, self.identity.address());
        packet.set_verb(Verb::Whois);
        packet.set_payload(address.as_bytes());
        running.transport.send(addr, packet.as_bytes()).await?;
        Ok(())
    }

    /// A learned identity from the cache, if any
    pub async fn lookup_identity(&self, address: Address) -> Option<Identity> {
        let guard = self.running.lock().await;
        let running = guard.as_ref()?;
        let identity = running.router.identities.read().unwrap().get(&address).cloned();
        identity
    }

    /// Statistics snapshot across the subsystems
    pub async fn stats(&self) -> NodeStats {
        let guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) => collect_stats(&running.router, running.started_at),
            None => NodeStats::default(),
        }
    }

    /// The switch, while running
    pub async fn switch(&self) -> Option<Arc<Switch>> {
        self.running.lock().await.as_ref().map(|r| Arc::clone(&r.switch))
    }

    /// The transport, while running
    pub async fn transport(&self) -> Option<Arc<ReliableUdpTransport>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.transport))
    }

    /// The discovery manager, while running
    pub async fn discovery(&self) -> Option<Arc<DiscoveryManager>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.discovery))
    }
}

/// Routes inbound transport payloads: discovery datagrams to the
/// discovery manager, packets and fragments through the assembler and
/// then by verb
struct Router {
    identity: Identity,
    transport: Arc<ReliableUdpTransport>,
    switch: Arc<Switch>,
    discovery: Arc<DiscoveryManager>,
    /// Socket address of each connected peer to its tunnel port
    peer_ports: RwLock<HashMap<SocketAddr, String>>,
    /// Identities learned at connect time or through WHOIS
    identities: RwLock<HashMap<Address, Identity>>,
    assembler: Mutex<FragmentAssembler>,
    events: Arc<dyn EventHandler>,
}

impl Router {
    fn into_handler(self: Arc<Self>) -> RecvHandler {
        Arc::new(move |addr, payload| self.route(addr, payload))
    }

    fn route(&self, addr: SocketAddr, payload: Vec<u8>) {
        if is_discovery_message(&payload) {
            let discovery = Arc::clone(&self.discovery);
            tokio::spawn(async move { discovery.handle_message(addr, &payload).await });
            return;
        }

        let completed = if is_fragment_bytes(&payload) {
            match Fragment::parse(&payload) {
                Ok(fragment) => self
                    .assembler
                    .lock()
                    .unwrap()
                    .add_fragment(fragment)
                    .unwrap_or_default(),
                Err(e) => {
                    trace!(%addr, error = %e, "dropping malformed fragment");
                    None
                }
            }
        } else {
            match Packet::parse(&payload) {
                Ok(packet) => self
                    .assembler
                    .lock()
                    .unwrap()
                    .add_packet(packet)
                    .unwrap_or_default(),
                Err(e) => {
                    trace!(%addr, error = %e, "dropping malformed packet");
                    None
                }
            }
        };

        let Some(packet) = completed else { return };
        if !packet.is_valid() {
            trace!(%addr, "dropping invalid packet");
            return;
        }

        self.handle_packet(addr, packet);
    }

    fn handle_packet(&self, addr: SocketAddr, packet: Packet) {
        match packet.verb() {
            Some(Verb::Frame) | Some(Verb::ExtFrame) => {
                let port_id = self.peer_ports.read().unwrap().get(&addr).cloned();
                match port_id {
                    Some(port_id) => {
                        if let Err(e) = self.switch.handle_frame(&port_id, packet.payload()) {
                            debug!(%addr, port_id, error = %e, "inbound frame dropped");
                        }
                    }
                    None => trace!(%addr, "frame from unconnected peer"),
                }
            }
            Some(Verb::Whois) => self.answer_whois(addr, &packet),
            Some(Verb::Ok) => self.learn_identity(addr, packet.payload()),
            Some(Verb::Error) => {
                trace!(%addr, source = %packet.source(), "peer reported an error")
            }
            Some(Verb::Nop) => {}
            other => trace!(%addr, verb = ?other, "unhandled verb"),
        }
    }

    /// Answer a WHOIS from our own identity or the learned cache;
    /// unknown addresses get an ERROR echoing the query
    fn answer_whois(&self, addr: SocketAddr, request: &Packet) {
        let payload = request.payload();
        if payload.len() < ADDRESS_LENGTH {
            return;
        }
        let Ok(queried) = Address::from_bytes(&payload[..ADDRESS_LENGTH]) else {
            return;
        };

        let known = if queried == self.identity.address() {
            Some(self.identity.clone())
        } else {
            self.identities.read().unwrap().get(&queried).cloned()
        };

        let mut reply = Packet::new(request.source(), self.identity.address());
        match known {
            Some(identity) => {
                // Never serialize a private key onto the wire
                let public = Identity::from_public_key(identity.public_key());
                let Ok(public) = public else { return };
                reply.set_verb(Verb::Ok);
                reply.set_payload(public.serialize().as_bytes());
            }
            None => {
                reply.set_verb(Verb::Error);
                reply.set_payload(queried.as_bytes());
            }
        }

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send(addr, reply.as_bytes()).await {
                debug!(%addr, error = %e, "whois reply failed");
            }
        });
    }

    /// Cache an identity carried in an OK payload, after validation
    fn learn_identity(&self, addr: SocketAddr, payload: &[u8]) {
        let Ok(text) = std::str::from_utf8(payload) else {
            trace!(%addr, "ok payload is not an identity");
            return;
        };
        let Ok(identity) = Identity::parse(text.trim()) else {
            trace!(%addr, "ok payload failed to parse");
            return;
        };
        if identity.validate().is_err() {
            debug!(%addr, "rejecting identity whose address does not match its key");
            return;
        }

        let address = identity.address();
        let fresh = self
            .identities
            .write()
            .unwrap()
            .insert(address, identity)
            .is_none();
        if fresh {
            let events = Arc::clone(&self.events);
            tokio::spawn(async move {
                events.on_event(NodeEvent::IdentityLearned { address }).await;
            });
        }
    }
}

fn collect_stats(router: &Router, started_at: Instant) -> NodeStats {
    NodeStats {
        switch: router.switch.stats(),
        pending_sends: router.transport.pending_count(),
        auth_failures: router.transport.auth_failure_count(),
        peers: router.discovery.peer_count(),
        uptime: started_at.elapsed(),
    }
}

/// Egress sink for a peer tunnel port: wrap the frame in a FRAME
/// packet, fragment if needed and hand it to the transport
fn peer_egress_sink(
    transport: Arc<ReliableUdpTransport>,
    addr: SocketAddr,
    peer_address: Address,
    local_address: Address,
) -> stella_switch::EgressSink {
    Box::new(move |egress| {
        let mut packet = Packet::new(peer_address, local_address);
        packet.set_verb(Verb::Frame);
        packet.set_payload(egress.frame);

        let (head, fragments) = split_packet(&packet, TUNNEL_MTU).map_err(|e| {
            stella_switch::Error::Egress {
                port: format!("peer-{peer_address}"),
                reason: e.to_string(),
            }
        })?;

        // The switch runs synchronously; the actual sends happen on
        // the runtime
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send(addr, head.as_bytes()).await {
                debug!(%addr, error = %e, "tunnel send failed");
                return;
            }
            for fragment in fragments {
                if let Err(e) = transport.send(addr, fragment.as_bytes()).await {
                    debug!(%addr, error = %e, "tunnel fragment send failed");
                    return;
                }
            }
        });

        Ok(())
    })
}

/// Spawn the periodic maintenance tasks: MAC aging, multicast member
/// aging and the main loop
fn spawn_maintenance(
    router: &Arc<Router>,
    events: Arc<dyn EventHandler>,
    started_at: Instant,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    let aging_router = Arc::clone(router);
    let mut aging_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let mut tick = interval(MAC_AGING_TICK);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = aging_shutdown.recv() => break,
                _ = tick.tick() => {
                    let removed = aging_router.switch.mac_table().age();
                    if removed > 0 {
                        debug!(removed, "aged MAC table entries");
                    }
                }
            }
        }
    }));

    let mcast_router = Arc::clone(router);
    let mut mcast_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let mut tick = interval(MULTICAST_AGING_TICK);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = mcast_shutdown.recv() => break,
                _ = tick.tick() => {
                    let removed = mcast_router.switch.multicast().age();
                    if removed > 0 {
                        debug!(removed, "aged multicast members");
                    }
                }
            }
        }
    }));

    let loop_router = Arc::clone(router);
    let mut loop_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let mut tick = interval(MAIN_LOOP_TICK);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = loop_shutdown.recv() => break,
                _ = tick.tick() => {
                    loop_router
                        .assembler
                        .lock()
                        .unwrap()
                        .expire(FRAGMENT_MAX_AGE);
                    let stats = collect_stats(&loop_router, started_at);
                    events.on_event(NodeEvent::StatsUpdate(stats)).await;
                }
            }
        }
    }));

    tasks
}

/// Load the identity file, or generate and persist a fresh one
fn load_or_generate_identity(path: &Path) -> Result<Identity> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let identity = Identity::parse(content.trim())?;
        identity.validate()?;
        if !identity.has_private_key() {
            return Err(Error::Config(
                "identity file does not contain a private key".to_string(),
            ));
        }
        return Ok(identity);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let identity = Identity::generate();
    std::fs::write(path, identity.serialize())?;
    info!(address = %identity.address(), "generated new identity");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> NodeConfig {
        NodeConfig {
            data_dir: dir.to_path_buf(),
            config_file: dir.join("config.json"),
            identity_file: dir.join("identity"),
            bind_addr: "127.0.0.1:0".to_string(),
            test_mode: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_persists_across_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let first = Node::new(config.clone()).unwrap();
        let second = Node::new(config).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn test_node_id_defaults_to_address() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();
        assert_eq!(node.config().node_id, node.address().to_hex());
    }

    #[test]
    fn test_corrupt_identity_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.identity_file, "not an identity").unwrap();

        assert!(Node::new(config).is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_stopped_running_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(node.stop().await.is_err());

        node.start().await.unwrap();
        assert!(node.is_running());
        assert!(node.start().await.is_err());

        node.stop().await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_force_stop_from_running() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();
        node.start().await.unwrap();

        node.force_stop().await;
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_connect_peer_creates_tunnel_port() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();
        node.start().await.unwrap();

        let peer = Identity::generate();
        let addr: SocketAddr = "127.0.0.1:9993".parse().unwrap();
        let port_id = node.connect_peer(addr, peer.clone()).await.unwrap();
        assert_eq!(port_id, format!("peer-{}", peer.address().to_hex()));

        let switch = node.switch().await.unwrap();
        assert!(switch.has_port(&port_id));

        // Connecting cached the peer's identity
        assert!(node.lookup_identity(peer.address()).await.is_some());

        node.disconnect_peer(addr).await.unwrap();
        assert!(!switch.has_port(&port_id));

        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_peer_requires_running_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();

        let peer = Identity::generate();
        let addr: SocketAddr = "127.0.0.1:9993".parse().unwrap();
        assert!(node.connect_peer(addr, peer).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_reflect_running_subsystems() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(test_config(dir.path())).unwrap();

        let idle = node.stats().await;
        assert_eq!(idle.peers, 0);

        node.start().await.unwrap();
        let transport = node.transport().await.unwrap();
        transport
            .send("127.0.0.1:9".parse().unwrap(), b"x")
            .await
            .unwrap();

        let stats = node.stats().await;
        assert_eq!(stats.pending_sends, 1);
        assert_eq!(stats.auth_failures, 0);

        node.stop().await.unwrap();
    }
}
