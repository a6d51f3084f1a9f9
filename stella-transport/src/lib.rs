//! Stella transport layer
//!
//! A reliable datagram transport over UDP: per-packet encryption with
//! peer-derived keys, 32-bit sequence numbers with immediate ACKs,
//! exponential-backoff retransmission, and a binary peer discovery
//! protocol (Hello/Response/Ping/Pong) riding on top of it.

mod config;
mod discovery;
mod error;
mod reliable;

pub use config::TransportConfig;
pub use discovery::{
    is_discovery_message, DiscoveredPeer, DiscoveryConfig, DiscoveryManager,
    DISCOVERY_PROTOCOL_VERSION,
};
pub use error::{Error, Result};
pub use reliable::{DatagramSender, RecvHandler, ReliableUdpTransport};
