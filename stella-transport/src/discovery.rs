//! Peer discovery
//!
//! Binary Hello/Response/Ping/Pong exchange carried as transport
//! payloads. Hello and Response embed the sender's public key so a
//! public-only identity can be built for the peer; Ping/Pong carry
//! only a timestamp, which Pong echoes back for latency measurement.
//!
//! Message layout (big-endian):
//!
//! ```text
//! version(1) | type(1) | timestamp_ms(8) | public_key(32)   Hello, Response
//! version(1) | type(1) | timestamp_ms(8)                    Ping, Pong
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, trace, warn};

use stella_protocol::crypto::KEY_LENGTH;
use stella_protocol::Identity;

use crate::{DatagramSender, Error, Result};

/// Discovery protocol version
pub const DISCOVERY_PROTOCOL_VERSION: u8 = 1;

const HEADER_LENGTH: usize = 10;
const KEYED_MESSAGE_LENGTH: usize = HEADER_LENGTH + KEY_LENGTH;

const TYPE_HELLO: u8 = 0;
const TYPE_RESPONSE: u8 = 1;
const TYPE_PING: u8 = 2;
const TYPE_PONG: u8 = 3;

/// A peer found through the discovery exchange
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    /// Public-only identity built from the peer's announced key
    pub identity: Identity,
    /// The peer's socket address
    pub addr: SocketAddr,
    /// When we last heard from the peer
    pub last_seen: Instant,
    /// True once the peer answered us (Response or Pong)
    pub connected: bool,
    /// Round-trip latency from the last Pong, if measured
    pub latency_ms: Option<u64>,
}

/// Timing knobs for the discovery manager
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between Ping rounds
    pub heartbeat_interval: Duration,
    /// Peers idle longer than this are culled
    pub discovery_timeout: Duration,
    /// Interval between cull sweeps
    pub cleanup_interval: Duration,
    /// Hello attempts in [`DiscoveryManager::discover`]
    pub max_retries: u32,
    /// How long each discover attempt waits for the peer to appear
    pub attempt_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            discovery_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            max_retries: 3,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// Maintains the table of discovered peers and answers their messages
pub struct DiscoveryManager {
    identity: Identity,
    transport: Arc<dyn DatagramSender>,
    config: DiscoveryConfig,
    peers: Arc<RwLock<HashMap<SocketAddr, DiscoveredPeer>>>,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// True when a transport payload looks like a discovery message
pub fn is_discovery_message(data: &[u8]) -> bool {
    (data.len() == HEADER_LENGTH || data.len() == KEYED_MESSAGE_LENGTH)
        && data[0] == DISCOVERY_PROTOCOL_VERSION
        && data[1] <= TYPE_PONG
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl DiscoveryManager {
    /// Create a manager announcing `identity` through `transport`
    pub fn new(identity: Identity, transport: Arc<dyn DatagramSender>) -> Self {
        Self::with_config(identity, transport, DiscoveryConfig::default())
    }

    /// Create a manager with explicit timing configuration
    pub fn with_config(
        identity: Identity,
        transport: Arc<dyn DatagramSender>,
        config: DiscoveryConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            identity,
            transport,
            config,
            peers: Arc::new(RwLock::new(HashMap::new())),
            running: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the heartbeat and cleanup loops
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let this = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move { this.heartbeat_loop(shutdown).await });
        self.tasks.lock().unwrap().push(handle);

        let this = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move { this.cleanup_loop(shutdown).await });
        self.tasks.lock().unwrap().push(handle);

        Ok(())
    }

    /// Cancel the loops and wait for them to exit
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        let handles: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn build_message(&self, msg_type: u8, timestamp_ms: u64) -> Vec<u8> {
        let keyed = msg_type == TYPE_HELLO || msg_type == TYPE_RESPONSE;
        let mut message =
            Vec::with_capacity(if keyed { KEYED_MESSAGE_LENGTH } else { HEADER_LENGTH });
        message.push(DISCOVERY_PROTOCOL_VERSION);
        message.push(msg_type);
        message.extend_from_slice(&timestamp_ms.to_be_bytes());
        if keyed {
            message.extend_from_slice(self.identity.public_key());
        }
        message
    }

    /// Send a Hello announcement to an address
    pub async fn send_hello(&self, addr: SocketAddr) -> Result<()> {
        self.transport
            .send(addr, &self.build_message(TYPE_HELLO, now_ms()))
            .await
    }

    /// Send a Ping to an address
    pub async fn send_ping(&self, addr: SocketAddr) -> Result<()> {
        self.transport
            .send(addr, &self.build_message(TYPE_PING, now_ms()))
            .await
    }

    /// Handle an inbound discovery message
    ///
    /// The caller routes payloads here after checking
    /// [`is_discovery_message`]. Unknown versions and types are
    /// dropped.
    pub async fn handle_message(&self, addr: SocketAddr, data: &[u8]) {
        if data.len() < HEADER_LENGTH || data[0] != DISCOVERY_PROTOCOL_VERSION {
            return;
        }

        match data[1] {
            TYPE_HELLO => self.handle_hello(addr, data).await,
            TYPE_RESPONSE => self.handle_response(addr, data),
            TYPE_PING => self.handle_ping(addr, data).await,
            TYPE_PONG => self.handle_pong(addr, data),
            other => trace!(%addr, msg_type = other, "unknown discovery message type"),
        }
    }

    async fn handle_hello(&self, addr: SocketAddr, data: &[u8]) {
        let Some(identity) = parse_peer_identity(data) else {
            debug!(%addr, "malformed hello");
            return;
        };

        self.upsert_peer(identity, addr, false);

        let response = self.build_message(TYPE_RESPONSE, now_ms());
        if let Err(e) = self.transport.send(addr, &response).await {
            warn!(%addr, error = %e, "failed to answer hello");
        }
    }

    fn handle_response(&self, addr: SocketAddr, data: &[u8]) {
        let Some(identity) = parse_peer_identity(data) else {
            debug!(%addr, "malformed response");
            return;
        };

        self.upsert_peer(identity, addr, true);
    }

    async fn handle_ping(&self, addr: SocketAddr, data: &[u8]) {
        // Pong echoes the Ping's timestamp
        let mut pong = self.build_message(TYPE_PONG, 0);
        pong[2..HEADER_LENGTH].copy_from_slice(&data[2..HEADER_LENGTH]);
        if let Err(e) = self.transport.send(addr, &pong).await {
            warn!(%addr, error = %e, "failed to answer ping");
        }
    }

    fn handle_pong(&self, addr: SocketAddr, data: &[u8]) {
        let echoed = u64::from_be_bytes(data[2..HEADER_LENGTH].try_into().unwrap());
        let latency_ms = now_ms().saturating_sub(echoed);

        let mut peers = self.peers.write().unwrap();
        if let Some(peer) = peers.get_mut(&addr) {
            peer.last_seen = Instant::now();
            peer.connected = true;
            peer.latency_ms = Some(latency_ms);
        }
    }

    fn upsert_peer(&self, identity: Identity, addr: SocketAddr, connected: bool) {
        let mut peers = self.peers.write().unwrap();
        match peers.entry(addr) {
            Entry::Occupied(mut entry) => {
                let peer = entry.get_mut();
                peer.identity = identity;
                peer.last_seen = Instant::now();
                peer.connected |= connected;
            }
            Entry::Vacant(entry) => {
                debug!(%addr, peer = %identity, "new peer");
                entry.insert(DiscoveredPeer {
                    identity,
                    addr,
                    last_seen: Instant::now(),
                    connected,
                    latency_ms: None,
                });
            }
        }
    }

    /// Actively discover the node at `addr`
    ///
    /// Sends Hello and waits up to the attempt timeout for the peer
    /// to appear in the table, retrying up to `max_retries` times
    /// before failing with [`Error::DiscoveryTimeout`].
    pub async fn discover(&self, addr: SocketAddr) -> Result<DiscoveredPeer> {
        const POLL_INTERVAL: Duration = Duration::from_millis(100);

        for _attempt in 0..self.config.max_retries {
            self.send_hello(addr).await?;

            let deadline = Instant::now() + self.config.attempt_timeout;
            while Instant::now() < deadline {
                if let Some(peer) = self.peer_by_addr(addr) {
                    return Ok(peer);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        Err(Error::DiscoveryTimeout {
            addr,
            attempts: self.config.max_retries,
        })
    }

    /// Look up a peer by socket address
    pub fn peer_by_addr(&self, addr: SocketAddr) -> Option<DiscoveredPeer> {
        self.peers.read().unwrap().get(&addr).cloned()
    }

    /// Snapshot of all known peers
    pub fn peers(&self) -> Vec<DiscoveredPeer> {
        self.peers.read().unwrap().values().cloned().collect()
    }

    /// Number of known peers
    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.config.heartbeat_interval);
        tick.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {
                    let addrs: Vec<SocketAddr> =
                        self.peers.read().unwrap().keys().copied().collect();
                    for addr in addrs {
                        // Stagger pings to avoid a synchronized burst
                        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if let Err(e) = this.send_ping(addr).await {
                                debug!(%addr, error = %e, "heartbeat ping failed");
                            }
                        });
                    }
                }
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(self.config.cleanup_interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {
                    let timeout = self.config.discovery_timeout;
                    let now = Instant::now();
                    self.peers.write().unwrap().retain(|addr, peer| {
                        let keep = now.duration_since(peer.last_seen) <= timeout;
                        if !keep {
                            debug!(%addr, "culling expired peer");
                        }
                        keep
                    });
                }
            }
        }
    }
}

fn parse_peer_identity(data: &[u8]) -> Option<Identity> {
    if data.len() < KEYED_MESSAGE_LENGTH {
        return None;
    }
    Identity::from_public_key(&data[HEADER_LENGTH..KEYED_MESSAGE_LENGTH]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Test double capturing everything sent through it
    struct CapturingSender {
        sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl CapturingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatagramSender for CapturingSender {
        async fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push((addr, payload.to_vec()));
            Ok(())
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
    }

    fn manager(sender: Arc<CapturingSender>) -> DiscoveryManager {
        DiscoveryManager::new(Identity::generate(), sender)
    }

    fn peer_addr() -> SocketAddr {
        "127.0.0.1:9993".parse().unwrap()
    }

    #[tokio::test]
    async fn test_hello_message_layout() {
        let sender = CapturingSender::new();
        let dm = manager(Arc::clone(&sender));

        dm.send_hello(peer_addr()).await.unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let (addr, message) = &sent[0];
        assert_eq!(*addr, peer_addr());
        assert_eq!(message.len(), KEYED_MESSAGE_LENGTH);
        assert_eq!(message[0], DISCOVERY_PROTOCOL_VERSION);
        assert_eq!(message[1], TYPE_HELLO);
        assert_eq!(&message[HEADER_LENGTH..], dm.identity.public_key());
        assert!(is_discovery_message(message));
    }

    #[tokio::test]
    async fn test_hello_inserts_peer_and_answers_with_response() {
        let sender = CapturingSender::new();
        let dm = manager(Arc::clone(&sender));

        let remote = Identity::generate();
        let mut hello = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_HELLO];
        hello.extend_from_slice(&now_ms().to_be_bytes());
        hello.extend_from_slice(remote.public_key());

        dm.handle_message(peer_addr(), &hello).await;

        let peer = dm.peer_by_addr(peer_addr()).expect("peer inserted");
        assert!(!peer.connected);
        assert_eq!(peer.identity.address(), remote.address());

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1[1], TYPE_RESPONSE);
    }

    #[tokio::test]
    async fn test_response_marks_peer_connected() {
        let sender = CapturingSender::new();
        let dm = manager(sender);

        let remote = Identity::generate();
        let mut response = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_RESPONSE];
        response.extend_from_slice(&now_ms().to_be_bytes());
        response.extend_from_slice(remote.public_key());

        dm.handle_message(peer_addr(), &response).await;

        let peer = dm.peer_by_addr(peer_addr()).unwrap();
        assert!(peer.connected);
    }

    #[tokio::test]
    async fn test_ping_answered_with_echoing_pong() {
        let sender = CapturingSender::new();
        let dm = manager(Arc::clone(&sender));

        let timestamp: u64 = 0x0102030405060708;
        let mut ping = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_PING];
        ping.extend_from_slice(&timestamp.to_be_bytes());

        dm.handle_message(peer_addr(), &ping).await;

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let pong = &sent[0].1;
        assert_eq!(pong.len(), HEADER_LENGTH);
        assert_eq!(pong[1], TYPE_PONG);
        assert_eq!(&pong[2..], &timestamp.to_be_bytes());
    }

    #[tokio::test]
    async fn test_pong_updates_latency_and_liveness() {
        let sender = CapturingSender::new();
        let dm = manager(sender);

        // Seed the peer via hello
        let remote = Identity::generate();
        let mut hello = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_HELLO];
        hello.extend_from_slice(&now_ms().to_be_bytes());
        hello.extend_from_slice(remote.public_key());
        dm.handle_message(peer_addr(), &hello).await;

        let sent_at = now_ms().saturating_sub(25);
        let mut pong = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_PONG];
        pong.extend_from_slice(&sent_at.to_be_bytes());
        dm.handle_message(peer_addr(), &pong).await;

        let peer = dm.peer_by_addr(peer_addr()).unwrap();
        assert!(peer.connected);
        let latency = peer.latency_ms.unwrap();
        assert!(latency >= 25, "latency {latency} below the simulated delay");
    }

    #[tokio::test]
    async fn test_malformed_messages_ignored() {
        let sender = CapturingSender::new();
        let dm = manager(Arc::clone(&sender));

        dm.handle_message(peer_addr(), &[]).await;
        dm.handle_message(peer_addr(), &[9, TYPE_HELLO, 0, 0]).await;
        // Hello without a key
        let mut short = vec![DISCOVERY_PROTOCOL_VERSION, TYPE_HELLO];
        short.extend_from_slice(&now_ms().to_be_bytes());
        dm.handle_message(peer_addr(), &short).await;

        assert_eq!(dm.peer_count(), 0);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_discover_times_out_against_silence() {
        let sender = CapturingSender::new();
        let dm = DiscoveryManager::with_config(
            Identity::generate(),
            Arc::clone(&sender) as Arc<dyn DatagramSender>,
            DiscoveryConfig {
                max_retries: 2,
                attempt_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let err = dm.discover(peer_addr()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DiscoveryTimeout { attempts: 2, .. }
        ));
        // One hello per attempt
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_upsert_keeps_single_entry() {
        let sender = CapturingSender::new();
        let dm = manager(sender);

        let remote = Identity::generate();
        dm.upsert_peer(remote.clone(), peer_addr(), false);
        dm.upsert_peer(remote, peer_addr(), true);

        assert_eq!(dm.peer_count(), 1);
        assert!(dm.peer_by_addr(peer_addr()).unwrap().connected);
    }
}
