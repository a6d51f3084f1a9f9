//! Error types for the node

use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during node operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("invalid node state: {0}")]
    InvalidState(String),

    #[error("failed to bind after {attempts} attempts: {reason}")]
    BindFailed { attempts: u32, reason: String },

    #[error("not connected to peer at {0}")]
    UnknownPeer(std::net::SocketAddr),

    #[error("protocol error: {0}")]
    Protocol(#[from] stella_protocol::Error),

    #[error("transport error: {0}")]
    Transport(#[from] stella_transport::Error),

    #[error("switch error: {0}")]
    Switch(#[from] stella_switch::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
