//! Stella Protocol Implementation
//!
//! Wire-level building blocks for the Stella virtual Ethernet switch:
//! node addresses, Ethernet MACs, Curve25519 identities, the packet
//! codec (header, cipher field, hop count, authenticator tag, verb)
//! and multi-fragment reassembly.
//!
//! The packet layout is byte-compatible with the ZeroTier peer
//! ecosystem at protocol version 13 (minimum 4).

mod address;
mod error;
mod fragment;
mod identity;
mod mac;
mod packet;

pub mod crypto;

pub use address::{Address, ADDRESS_LENGTH};
pub use error::{Error, Result};
pub use fragment::{split_packet, FragmentAssembler};
pub use identity::Identity;
pub use mac::{Mac, MAC_LENGTH};
pub use packet::{
    is_fragment_bytes, Cipher, Fragment, Packet, Verb, FLAG_EXTENDED_CIPHER, FLAG_FRAGMENTED,
    FLAG_TRUSTED_PATH, FRAGMENT_HEADER_LENGTH, FRAGMENT_INDICATOR, HEADER_LENGTH, MAX_FRAGMENTS,
    MAX_HOPS, MAX_PACKET_LENGTH,
};

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 13;

/// Minimum peer protocol version we interoperate with
pub const PROTOCOL_VERSION_MIN: u8 = 4;
