//! Node addresses
//!
//! A node address is 5 bytes derived from the node's public key: the
//! leading bytes of its SHA-512 hash. Addresses order and compare
//! bytewise and print as 10 lowercase hex digits.

use std::fmt;
use std::str::FromStr;

use crate::crypto;
use crate::{Error, Result};

/// Node address length in bytes
pub const ADDRESS_LENGTH: usize = 5;

/// A 5-byte node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Parse an address from a hex string
    ///
    /// Dashes are stripped before parsing; anything other than 10 hex
    /// digits is rejected.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.replace('-', "");
        if s.len() != ADDRESS_LENGTH * 2 {
            return Err(Error::InvalidAddress(format!(
                "expected {} hex digits, got {}",
                ADDRESS_LENGTH * 2,
                s.len()
            )));
        }

        let bytes = hex::decode(&s).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Create an address from raw bytes
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() != ADDRESS_LENGTH {
            return Err(Error::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LENGTH,
                b.len()
            )));
        }

        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(b);
        Ok(Self(bytes))
    }

    /// Derive an address from a public key
    ///
    /// The address is the leading 5 bytes of the key's SHA-512 hash.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let hash = crypto::hash(public_key);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&hash[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// The raw address bytes
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Hex string form (10 lowercase digits)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let addr = Address::from_bytes(&[0xde, 0xad, 0xbe, 0xef, 0x00]).unwrap();
        assert_eq!(addr.to_hex(), "deadbeef00");
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
    }

    #[test]
    fn test_from_hex_strips_dashes() {
        let addr = Address::from_hex("dead-beef-00").unwrap();
        assert_eq!(addr.as_bytes(), &[0xde, 0xad, 0xbe, 0xef, 0x00]);
    }

    #[test]
    fn test_from_hex_rejects_bad_lengths() {
        assert!(Address::from_hex("deadbeef").is_err());
        assert!(Address::from_hex("deadbeef0011").is_err());
        assert!(Address::from_hex("").is_err());
    }

    #[test]
    fn test_from_bytes_rejects_bad_lengths() {
        assert!(Address::from_bytes(&[1, 2, 3, 4]).is_err());
        assert!(Address::from_bytes(&[1, 2, 3, 4, 5, 6]).is_err());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = Address::from_bytes(&[0, 0, 0, 0, 1]).unwrap();
        let b = Address::from_bytes(&[0, 0, 0, 1, 0]).unwrap();
        assert!(a < b);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_derived_from_public_key() {
        let public_key = [7u8; 32];
        let addr = Address::from_public_key(&public_key);
        let hash = crypto::hash(&public_key);
        assert_eq!(addr.as_bytes()[..], hash[..ADDRESS_LENGTH]);
    }
}
