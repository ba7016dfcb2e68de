//! 32-byte opaque identifier for blocks and transactions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{strip_hex_prefix, TypeError};

/// A 32-byte hash.
///
/// Wraps the digest output of the protocol hash function. The all-zero value
/// is a sentinel: genesis headers carry it as their previous-block hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Byte length of every hash in the system.
    pub const LENGTH: usize = 32;

    /// The all-zero sentinel hash.
    pub fn zero() -> Self {
        Self([0u8; Self::LENGTH])
    }

    /// Returns `true` if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Wraps a raw 32-byte array.
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copies a hash out of a byte slice, rejecting any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != Self::LENGTH {
            return Err(TypeError::InvalidLength {
                kind: "hash",
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

    /// Copies the hash into an owned `Vec<u8>` (storage keys, payloads).
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
