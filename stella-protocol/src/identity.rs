//! Node identities
//!
//! An identity bundles a node address with its Curve25519 key pair.
//! The address is not free-form: it must equal the leading bytes of
//! the public key's hash, which [`Identity::validate`] re-checks. Keys
//! are immutable once the identity is constructed.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crypto::{self, KeyPair, HASH_LENGTH, KEY_LENGTH};
use crate::{Address, Error, Result};

/// A node identity: address plus key material
#[derive(Clone)]
pub struct Identity {
    address: Address,
    public_key: [u8; KEY_LENGTH],
    private_key: Option<[u8; KEY_LENGTH]>,
}

impl Identity {
    /// Generate a new identity with a fresh key pair
    ///
    /// Keys whose derived address starts 0xff (the on-wire fragment
    /// indicator) or is all zero are discarded and regenerated.
    pub fn generate() -> Self {
        loop {
            let pair = KeyPair::generate();
            let address = Address::from_public_key(&pair.public);
            let bytes = address.as_bytes();
            if bytes[0] == 0xff || bytes == &[0u8; 5] {
                continue;
            }
            return Self {
                address,
                public_key: pair.public,
                private_key: Some(pair.private),
            };
        }
    }

    /// Construct a public-only identity from a peer's public key
    pub fn from_public_key(public_key: &[u8]) -> Result<Self> {
        let public_key: [u8; KEY_LENGTH] =
            public_key
                .try_into()
                .map_err(|_| Error::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    actual: public_key.len(),
                })?;

        Ok(Self {
            address: Address::from_public_key(&public_key),
            public_key,
            private_key: None,
        })
    }

    /// The node address
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The public key
    pub const fn public_key(&self) -> &[u8; KEY_LENGTH] {
        &self.public_key
    }

    /// Whether this identity carries a private key
    pub const fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Re-derive the address from the public key and compare
    pub fn validate(&self) -> Result<()> {
        if self.address == Address::from_public_key(&self.public_key) {
            Ok(())
        } else {
            Err(Error::IdentityInvalid)
        }
    }

    /// Derive the shared secret with another identity
    ///
    /// Requires our private key; fails with [`Error::NoPrivateKey`]
    /// otherwise.
    pub fn shared_secret_with(&self, other: &Identity) -> Result<[u8; HASH_LENGTH]> {
        let private = self.private_key.as_ref().ok_or(Error::NoPrivateKey)?;
        crypto::derive_shared_secret(private, &other.public_key)
    }

    /// Canonical textual form:
    /// `address_hex ":" base64(public_key) [":" base64(private_key)]`
    pub fn serialize(&self) -> String {
        let mut s = format!("{}:{}", self.address.to_hex(), BASE64.encode(self.public_key));
        if let Some(private) = &self.private_key {
            s.push(':');
            s.push_str(&BASE64.encode(private));
        }
        s
    }

    /// Parse the canonical textual form
    ///
    /// The private key part is optional. The embedded address is kept
    /// as-is; call [`Identity::validate`] to check it against the key.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::InvalidIdentityString);
        }

        let address = Address::from_hex(parts[0])?;
        let public_key: [u8; KEY_LENGTH] = BASE64
            .decode(parts[1])?
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidIdentityString)?;

        let private_key = match parts.get(2) {
            Some(p) if !p.is_empty() => Some(
                BASE64
                    .decode(p)?
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidIdentityString)?,
            ),
            _ => None,
        };

        Ok(Self {
            address,
            public_key,
            private_key,
        })
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The private key is redacted from the display form
impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}...",
            self.address.to_hex(),
            hex::encode(&self.public_key[..8])
        )
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("public_key", &hex::encode(self.public_key))
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_valid() {
        let id = Identity::generate();
        assert!(id.has_private_key());
        id.validate().unwrap();
        assert_eq!(id.address(), Address::from_public_key(id.public_key()));
    }

    #[test]
    fn test_serialize_roundtrip_with_private_key() {
        let id = Identity::generate();
        let parsed = Identity::parse(&id.serialize()).unwrap();

        assert_eq!(parsed.address(), id.address());
        assert_eq!(parsed.public_key(), id.public_key());
        assert!(parsed.has_private_key());
        parsed.validate().unwrap();
    }

    #[test]
    fn test_serialize_roundtrip_public_only() {
        let id = Identity::generate();
        let public = Identity::from_public_key(id.public_key()).unwrap();
        assert!(!public.has_private_key());

        let parsed = Identity::parse(&public.serialize()).unwrap();
        assert_eq!(parsed.address(), id.address());
        assert!(!parsed.has_private_key());
    }

    #[test]
    fn test_validate_detects_mismatched_address() {
        let a = Identity::generate();
        let b = Identity::generate();

        // Splice a's address onto b's key
        let forged = format!("{}:{}", a.address().to_hex(), BASE64.encode(b.public_key()));
        let parsed = Identity::parse(&forged).unwrap();
        assert!(matches!(parsed.validate(), Err(Error::IdentityInvalid)));
    }

    #[test]
    fn test_parse_rejects_malformed_strings() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("deadbeef00").is_err());
        assert!(Identity::parse("deadbeef00:!!!not-base64!!!").is_err());
        assert!(Identity::parse("deadbeef00:aaaa:bbbb:cccc").is_err());
    }

    #[test]
    fn test_shared_secret_requires_private_key() {
        let a = Identity::generate();
        let b = Identity::generate();
        let b_public = Identity::from_public_key(b.public_key()).unwrap();

        assert!(a.shared_secret_with(&b_public).is_ok());
        assert!(matches!(
            b_public.shared_secret_with(&a),
            Err(Error::NoPrivateKey)
        ));
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_eq!(
            a.shared_secret_with(&b).unwrap(),
            b.shared_secret_with(&a).unwrap()
        );
    }

    #[test]
    fn test_display_redacts_private_key() {
        let id = Identity::generate();
        let shown = id.to_string();
        let serialized = id.serialize();
        let private_part = serialized.rsplit(':').next().unwrap();
        assert!(!shown.contains(private_part));
    }
}
