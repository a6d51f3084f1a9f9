//! Error types for the transport layer

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport is not running")]
    NotRunning,

    #[error("transport is already running")]
    AlreadyRunning,

    #[error("no public key registered for peer {0}")]
    NoPeerKey(SocketAddr),

    #[error("failed to discover node at {addr} after {attempts} attempts")]
    DiscoveryTimeout { addr: SocketAddr, attempts: u32 },

    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(#[from] stella_protocol::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
