//! Ethernet MAC addresses

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::{Address, Error, Result, ADDRESS_LENGTH};

/// MAC address length in bytes
pub const MAC_LENGTH: usize = 6;

/// A 6-byte Ethernet MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mac([u8; MAC_LENGTH]);

impl Mac {
    /// Create a MAC from raw bytes
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() != MAC_LENGTH {
            return Err(Error::InvalidAddress(format!(
                "expected {} bytes, got {}",
                MAC_LENGTH,
                b.len()
            )));
        }

        let mut bytes = [0u8; MAC_LENGTH];
        bytes.copy_from_slice(b);
        Ok(Self(bytes))
    }

    /// Derive the MAC a node presents on the virtual LAN
    ///
    /// Byte 0 is 0x02 (locally administered, unicast); the remaining
    /// five bytes are the node address.
    pub fn from_address(addr: &Address) -> Self {
        let mut bytes = [0u8; MAC_LENGTH];
        bytes[0] = 0x02;
        bytes[1..].copy_from_slice(addr.as_bytes());
        Self(bytes)
    }

    /// Generate a random MAC
    ///
    /// The locally administered bit is set and the multicast bit
    /// cleared so generated MACs never collide with OUI-assigned ones.
    pub fn random() -> Self {
        let mut bytes: [u8; MAC_LENGTH] = rand::thread_rng().gen();
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        Self(bytes)
    }

    /// The raw MAC bytes
    pub const fn as_bytes(&self) -> &[u8; MAC_LENGTH] {
        &self.0
    }

    /// True for ff:ff:ff:ff:ff:ff
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; MAC_LENGTH]
    }

    /// True when the group bit (low bit of byte 0) is set
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// The node address embedded in a derived MAC, if this looks like one
    pub fn to_address(&self) -> Option<Address> {
        if self.0[0] != 0x02 {
            return None;
        }
        Address::from_bytes(&self.0[1..=ADDRESS_LENGTH]).ok()
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for Mac {
    type Err = Error;

    /// Parse `00:11:22:33:44:55`, `00-11-22-33-44-55` or `001122334455`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.replace([':', '-'], "");
        if s.len() != MAC_LENGTH * 2 {
            return Err(Error::InvalidAddress(format!(
                "expected {} hex digits, got {}",
                MAC_LENGTH * 2,
                s.len()
            )));
        }

        let bytes = hex::decode(&s).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        let colon: Mac = "00:11:22:33:44:55".parse().unwrap();
        let dash: Mac = "00-11-22-33-44-55".parse().unwrap();
        let plain: Mac = "001122334455".parse().unwrap();
        assert_eq!(colon, dash);
        assert_eq!(colon, plain);
        assert_eq!(colon.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_rejects_bad_lengths() {
        assert!("00:11:22:33:44".parse::<Mac>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<Mac>().is_err());
    }

    #[test]
    fn test_broadcast_and_multicast_predicates() {
        let bcast = Mac::from_bytes(&[0xff; 6]).unwrap();
        assert!(bcast.is_broadcast());
        assert!(bcast.is_multicast());

        let mcast = Mac::from_bytes(&[0x01, 0x00, 0x5e, 1, 2, 3]).unwrap();
        assert!(mcast.is_multicast());
        assert!(!mcast.is_broadcast());

        let unicast = Mac::from_bytes(&[0x02, 0, 0, 0, 0, 1]).unwrap();
        assert!(!unicast.is_multicast());
        assert!(!unicast.is_broadcast());
    }

    #[test]
    fn test_from_address() {
        let addr = Address::from_hex("deadbeef01").unwrap();
        let mac = Mac::from_address(&addr);
        assert_eq!(mac.as_bytes(), &[0x02, 0xde, 0xad, 0xbe, 0xef, 0x01]);
        assert!(!mac.is_multicast());
        assert_eq!(mac.to_address(), Some(addr));
    }

    #[test]
    fn test_random_is_locally_administered_unicast() {
        for _ in 0..32 {
            let mac = Mac::random();
            assert_eq!(mac.as_bytes()[0] & 0x02, 0x02);
            assert!(!mac.is_multicast());
        }
    }
}
