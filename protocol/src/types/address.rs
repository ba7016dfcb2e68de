//! 20-byte account identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{strip_hex_prefix, TypeError};

/// A 20-byte account address.
///
/// Derived from a public key as the low 20 bytes of `SHA-256(compressed
/// SEC1 encoding)` — see [`crate::crypto::PublicKey::address`]. Addresses
/// are what the state layer keys accounts by; they carry no checksum.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Byte length of every address.
    pub const LENGTH: usize = 20;

    /// Wraps a raw 20-byte array.
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copies an address out of a byte slice, rejecting any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != Self::LENGTH {
            return Err(TypeError::InvalidLength {
                kind: "address",
                expected: Self::LENGTH,
                got: bytes.len(),
            });
        }
        let mut out = [0u8; Self::LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Parses a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(strip_hex_prefix(s))?;
        Self::from_slice(&bytes)
    }

    /// Borrows the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    /// Copies the address into an owned `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
