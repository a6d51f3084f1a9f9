//! Error types for the Stella protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("message authentication failed")]
    AuthenticationFailed,

    #[error("identity address does not match its public key")]
    IdentityInvalid,

    #[error("identity has no private key")]
    NoPrivateKey,

    #[error("invalid identity string format")]
    InvalidIdentityString,

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
