//! Configuration for the reliable UDP transport

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for [`ReliableUdpTransport`](crate::ReliableUdpTransport)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// UDP bind address; loopback when unset
    pub addr: IpAddr,
    /// UDP bind port; 0 asks the OS for an ephemeral port
    pub port: u16,
    /// Receive buffer size in bytes
    pub buffer_size: usize,
    /// Retransmissions per pending record before it is discarded
    pub max_retries: u32,
    /// Base retransmission backoff
    pub retry_interval: Duration,
    /// Double the backoff on every retry
    pub retry_exponential: bool,
    /// Enable the reliable path (sequence numbers + ACKs); when off,
    /// sends are fire-and-forget
    pub ack_handler_enabled: bool,
    /// Encrypt datagrams to peers whose public key is registered
    pub encryption_enabled: bool,
    /// Bind no real socket; sends and receives are no-ops that still
    /// exercise sequence and pending-record state
    pub test_mode: bool,
    /// Socket read timeout slice
    pub read_timeout: Duration,
    /// Socket write timeout
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 4433,
            buffer_size: 4096,
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
            retry_exponential: false,
            ack_handler_enabled: true,
            encryption_enabled: true,
            test_mode: false,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
        }
    }
}
