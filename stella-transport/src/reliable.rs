//! Reliable encrypted UDP datagram transport
//!
//! Sends opaque payloads to peers with per-datagram encryption,
//! 32-bit sequence numbers, immediate ACKs and exponential-backoff
//! retransmission. Datagram framing (multi-byte fields big-endian):
//!
//! ```text
//! ACKs off, plaintext:  payload
//! ACKs off, encrypted:  0x01 | nonce(8) | ciphertext+tag
//! ACKs on,  DATA:       0x00 | seq(4) | <one of the two forms above>
//! ACKs on,  ACK:        0x01 | seq(4)
//! ```
//!
//! Encryption uses the Salsa20/12+Poly1305 construction keyed by the
//! first 32 bytes of the ECDH shared secret with the peer whose public
//! key is registered for the remote address. Without a registered key
//! the payload goes out in the clear.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, trace, warn};

use stella_protocol::crypto::{self, KEY_LENGTH, NONCE_LENGTH, TAG_LENGTH};
use stella_protocol::Identity;

use crate::{Error, Result, TransportConfig};

const DATAGRAM_DATA: u8 = 0x00;
const DATAGRAM_ACK: u8 = 0x01;
const ENCRYPTED_MARKER: u8 = 0x01;
const SEQ_LENGTH: usize = 4;
const RETRANSMIT_TICK: Duration = Duration::from_millis(100);

/// Callback receiving decrypted payloads from the transport
pub type RecvHandler = Arc<dyn Fn(SocketAddr, Vec<u8>) + Send + Sync>;

/// The send capability of a datagram transport
///
/// The reliable UDP transport is the production implementation; tests
/// substitute doubles that capture or drop traffic.
#[async_trait]
pub trait DatagramSender: Send + Sync {
    /// Send an opaque payload to a peer
    async fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<()>;

    /// The local address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// One outstanding reliable datagram awaiting its ACK
struct PendingSend {
    addr: SocketAddr,
    /// Full wire bytes, resent verbatim on retry
    bytes: Vec<u8>,
    retries: u32,
    #[allow(dead_code)]
    send_time: Instant,
    next_retry: Instant,
}

/// Reliable encrypted UDP transport
///
/// Owns the socket, the pending-send map and the registry of peer
/// public keys keyed by remote address. Cloning is done via `Arc`; the
/// receive and retransmission loops run as background tasks between
/// [`start`](Self::start) and [`stop`](Self::stop).
pub struct ReliableUdpTransport {
    config: TransportConfig,
    identity: Identity,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    running: AtomicBool,
    next_seq: AtomicU32,
    pending: Mutex<HashMap<(SocketAddr, u32), PendingSend>>,
    peer_keys: RwLock<HashMap<SocketAddr, [u8; KEY_LENGTH]>>,
    /// Cache of derived session keys, invalidated when a peer key is
    /// re-registered
    session_keys: RwLock<HashMap<SocketAddr, [u8; KEY_LENGTH]>>,
    handler: RwLock<Option<RecvHandler>>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    auth_failures: AtomicU64,
}

impl ReliableUdpTransport {
    /// Create a transport; no socket is bound until [`start`](Self::start)
    pub fn new(config: TransportConfig, identity: Identity) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            identity,
            socket: RwLock::new(None),
            running: AtomicBool::new(false),
            next_seq: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            peer_keys: RwLock::new(HashMap::new()),
            session_keys: RwLock::new(HashMap::new()),
            handler: RwLock::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            auth_failures: AtomicU64::new(0),
        }
    }

    /// Bind the socket and spawn the receive and retransmission loops
    ///
    /// In test mode no socket is bound and only the retransmission
    /// loop runs.
    pub async fn start(self: &Arc<Self>, handler: RecvHandler) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        *self.handler.write().unwrap() = Some(handler);

        if !self.config.test_mode {
            let socket = match UdpSocket::bind((self.config.addr, self.config.port)).await {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    // Roll back so the caller may retry the bind
                    self.running.store(false, Ordering::SeqCst);
                    *self.handler.write().unwrap() = None;
                    return Err(e.into());
                }
            };
            *self.socket.write().unwrap() = Some(Arc::clone(&socket));

            let this = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            let handle = tokio::spawn(async move { this.receive_loop(socket, shutdown).await });
            self.tasks.lock().unwrap().push(handle);
        }

        if self.config.ack_handler_enabled {
            let this = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            let handle = tokio::spawn(async move { this.retransmit_loop(shutdown).await });
            self.tasks.lock().unwrap().push(handle);
        }

        debug!(test_mode = self.config.test_mode, "transport started");
        Ok(())
    }

    /// Cancel the background loops, wait for them to observe
    /// cancellation, then close the socket
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(());
        let handles: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        *self.socket.write().unwrap() = None;
        *self.handler.write().unwrap() = None;
        self.pending.lock().unwrap().clear();
        debug!("transport stopped");
    }

    /// Whether the transport is between start and stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a peer's long-term public key for its socket address
    ///
    /// Datagrams to and from this address are encrypted from now on
    /// (when encryption is enabled).
    pub fn set_peer_public_key(&self, addr: SocketAddr, public_key: [u8; KEY_LENGTH]) {
        self.peer_keys.write().unwrap().insert(addr, public_key);
        self.session_keys.write().unwrap().remove(&addr);
    }

    /// The session key shared with `addr`, derived on first use
    fn session_key(&self, addr: SocketAddr) -> Option<[u8; KEY_LENGTH]> {
        if let Some(key) = self.session_keys.read().unwrap().get(&addr) {
            return Some(*key);
        }

        let peer_public = *self.peer_keys.read().unwrap().get(&addr)?;
        let peer = Identity::from_public_key(&peer_public).ok()?;
        let secret = self.identity.shared_secret_with(&peer).ok()?;

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&secret[..KEY_LENGTH]);
        self.session_keys.write().unwrap().insert(addr, key);
        Some(key)
    }

    /// Send an opaque payload to a peer
    ///
    /// Under ACKs the datagram is recorded for retransmission until
    /// the peer acknowledges its sequence number or retries run out.
    pub async fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }

        let seq = self
            .config
            .ack_handler_enabled
            .then(|| self.next_seq.fetch_add(1, Ordering::SeqCst));

        let inner = if self.config.encryption_enabled {
            match self.session_key(addr) {
                Some(key) => {
                    let nonce: [u8; NONCE_LENGTH] = rand::random();
                    let ciphertext = crypto::encrypt_authenticated(payload, &key, &nonce);
                    let mut inner = Vec::with_capacity(1 + NONCE_LENGTH + ciphertext.len());
                    inner.push(ENCRYPTED_MARKER);
                    inner.extend_from_slice(&nonce);
                    inner.extend_from_slice(&ciphertext);
                    inner
                }
                // No key registered for this peer: send in the clear
                None => payload.to_vec(),
            }
        } else {
            payload.to_vec()
        };

        let datagram = match seq {
            Some(seq) => {
                let mut d = Vec::with_capacity(1 + SEQ_LENGTH + inner.len());
                d.push(DATAGRAM_DATA);
                d.extend_from_slice(&seq.to_be_bytes());
                d.extend_from_slice(&inner);
                d
            }
            None => inner,
        };

        self.write(addr, &datagram).await?;

        if let Some(seq) = seq {
            let now = Instant::now();
            self.pending.lock().unwrap().insert(
                (addr, seq),
                PendingSend {
                    addr,
                    bytes: datagram,
                    retries: 0,
                    send_time: now,
                    next_retry: now + self.config.retry_interval,
                },
            );
            trace!(%addr, seq, "recorded pending send");
        }

        Ok(())
    }

    /// Write raw bytes to the socket under the write timeout
    ///
    /// A no-op in test mode.
    async fn write(&self, addr: SocketAddr, bytes: &[u8]) -> Result<()> {
        let socket = self.socket.read().unwrap().as_ref().cloned();
        let Some(socket) = socket else {
            return Ok(());
        };

        match timeout(self.config.write_timeout, socket.send_to(bytes, addr)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(Error::WriteTimeout(self.config.write_timeout)),
        }
    }

    async fn receive_loop(&self, socket: Arc<UdpSocket>, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; self.config.buffer_size];
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = timeout(self.config.read_timeout, socket.recv_from(&mut buf)) => {
                    match result {
                        // Read timeout slice elapsed; loop to observe cancellation
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            warn!(error = %e, "socket read failed");
                            continue;
                        }
                        Ok(Ok((n, addr))) => {
                            if n == 0 {
                                continue;
                            }
                            let data = buf[..n].to_vec();
                            self.handle_datagram(addr, data).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, addr: SocketAddr, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }

        if self.config.ack_handler_enabled {
            match data[0] {
                DATAGRAM_ACK => {
                    if data.len() < 1 + SEQ_LENGTH {
                        return;
                    }
                    let seq = u32::from_be_bytes(data[1..5].try_into().unwrap());
                    if self.pending.lock().unwrap().remove(&(addr, seq)).is_some() {
                        trace!(%addr, seq, "acked");
                    }
                    return;
                }
                DATAGRAM_DATA => {
                    if data.len() < 1 + SEQ_LENGTH {
                        return;
                    }
                    let seq = u32::from_be_bytes(data[1..5].try_into().unwrap());

                    // ACK before the payload reaches the handler
                    let mut ack = Vec::with_capacity(1 + SEQ_LENGTH);
                    ack.push(DATAGRAM_ACK);
                    ack.extend_from_slice(&seq.to_be_bytes());
                    if let Err(e) = self.write(addr, &ack).await {
                        debug!(%addr, seq, error = %e, "failed to send ack");
                    }

                    if let Some(payload) = self.unwrap_inner(addr, &data[1 + SEQ_LENGTH..]) {
                        self.deliver(addr, payload);
                    }
                    return;
                }
                _ => {}
            }
        }

        // Unframed datagram
        if let Some(payload) = self.unwrap_inner(addr, &data) {
            self.deliver(addr, payload);
        }
    }

    /// Unwrap the optionally-encrypted inner portion of a datagram
    ///
    /// The leading marker byte selects the encrypted form, but only
    /// when a session key is known for the sender; datagrams from
    /// unkeyed peers pass through as plaintext. Authentication
    /// failures drop the datagram and bump the failure counter.
    fn unwrap_inner(&self, addr: SocketAddr, inner: &[u8]) -> Option<Vec<u8>> {
        let encrypted = inner.first() == Some(&ENCRYPTED_MARKER)
            && inner.len() >= 1 + NONCE_LENGTH + TAG_LENGTH;
        if !encrypted {
            return Some(inner.to_vec());
        }

        let Some(key) = self.session_key(addr) else {
            return Some(inner.to_vec());
        };

        let nonce: [u8; NONCE_LENGTH] = inner[1..1 + NONCE_LENGTH].try_into().unwrap();
        match crypto::decrypt_authenticated(&inner[1 + NONCE_LENGTH..], &key, &nonce) {
            Ok(payload) => Some(payload),
            Err(_) => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
                debug!(%addr, "dropping datagram that failed authentication");
                None
            }
        }
    }

    fn deliver(&self, addr: SocketAddr, payload: Vec<u8>) {
        let handler = self.handler.read().unwrap().as_ref().cloned();
        if let Some(handler) = handler {
            handler(addr, payload);
        }
    }

    async fn retransmit_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(RETRANSMIT_TICK);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {
                    // Bookkeeping happens under the lock; the socket
                    // writes use cloned bytes after it is released.
                    let due = {
                        let mut pending = self.pending.lock().unwrap();
                        let now = Instant::now();
                        let mut due = Vec::new();
                        let mut exhausted = Vec::new();

                        for (key, record) in pending.iter_mut() {
                            if record.next_retry > now {
                                continue;
                            }
                            if record.retries >= self.config.max_retries {
                                exhausted.push(*key);
                                continue;
                            }
                            record.retries += 1;
                            let factor = if self.config.retry_exponential {
                                1u32 << record.retries.min(16)
                            } else {
                                1
                            };
                            record.next_retry = now + self.config.retry_interval * factor;
                            due.push((record.addr, record.bytes.clone()));
                        }

                        for key in exhausted {
                            pending.remove(&key);
                            debug!(addr = %key.0, seq = key.1, "retransmit exhausted, dropping record");
                        }

                        due
                    };

                    for (addr, bytes) in due {
                        // Write errors leave the record in place for
                        // the next tick
                        if let Err(e) = self.write(addr, &bytes).await {
                            debug!(%addr, error = %e, "retransmit failed");
                        }
                    }
                }
            }
        }
    }

    /// The bound socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .read()
            .unwrap()
            .as_ref()
            .ok_or(Error::NotRunning)?
            .local_addr()
            .map_err(Into::into)
    }

    /// Our own identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Number of datagrams awaiting an ACK
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Number of datagrams dropped for failed authentication
    pub fn auth_failure_count(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DatagramSender for ReliableUdpTransport {
    async fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<()> {
        ReliableUdpTransport::send(self, addr, payload).await
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        ReliableUdpTransport::local_addr(self)
    }
}
