//! # Keys & Signatures
//!
//! ECDSA over NIST P-256, wrapped into three small types:
//!
//! - [`PrivateKey`] — held only by the validator process; signs headers and
//!   by wallets to sign transactions.
//! - [`PublicKey`] — the compressed SEC1 point (33 bytes). Travels on the
//!   wire inside transactions and blocks, and is what addresses derive from.
//! - [`Signature`] — the `(r, s)` scalar pair, serialized as 64 bytes.
//!
//! Signing hashes the message with SHA-256 before the raw ECDSA step;
//! verification recomputes the same hash. This is the P-256 default in the
//! RustCrypto stack, so `sign`/`verify` below are thin, auditable wrappers.
//!
//! Verification returns a bare `bool` on purpose: callers never need to know
//! *why* a signature failed, and a detailed error oracle helps nobody but an
//! attacker.

use std::fmt;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::hash::sha256;
use crate::types::{strip_hex_prefix, Address};

/// Length of a compressed SEC1 public key.
const PUBLIC_KEY_LENGTH: usize = 33;

/// Length of a serialized `(r, s)` signature.
const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced when reconstructing key material from bytes or hex.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key bytes")]
    InvalidPrivateKey,

    #[error("invalid public key: not a valid compressed P-256 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidSignature,

    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

// ---------------------------------------------------------------------------
// PrivateKey
// ---------------------------------------------------------------------------

/// A P-256 signing key.
///
/// The node that holds one is, by definition, the validator. `Debug` is
/// deliberately redacted so key material cannot end up in a log line.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Reconstructs a key from its 32-byte scalar.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { inner })
    }

    /// Parses a hex-encoded 32-byte scalar, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(strip_hex_prefix(s))?;
        Self::from_slice(&bytes)
    }

    /// Hex-encodes the 32-byte scalar, for key files.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    /// Signs `data`: SHA-256 first, then ECDSA over the digest.
    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature {
            inner: self.inner.sign(data),
        }
    }

    /// Returns the corresponding public key in compressed SEC1 form.
    pub fn public_key(&self) -> PublicKey {
        let point = self.inner.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey(bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A compressed SEC1 P-256 public key (33 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Validates and wraps a compressed SEC1 encoding.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(CryptoError::InvalidPublicKey);
        }
        VerifyingKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Parses a hex-encoded compressed point, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(strip_hex_prefix(s))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Borrows the compressed SEC1 bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Hex-encodes the compressed point.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Derives the account address: the low 20 bytes of `SHA-256(pubkey)`.
    pub fn address(&self) -> Address {
        let digest = sha256(&self.0);
        let bytes = digest.as_bytes();
        let mut out = [0u8; Address::LENGTH];
        out.copy_from_slice(&bytes[bytes.len() - Address::LENGTH..]);
        Address::from_bytes(out)
    }

    /// Verifies `signature` over `data` (SHA-256 prehash, then ECDSA).
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        match VerifyingKey::from_sec1_bytes(&self.0) {
            Ok(key) => key.verify(data, &signature.inner).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// An ECDSA `(r, s)` signature, serialized as 64 bytes `r || s`.
#[derive(Clone, Copy)]
pub struct Signature {
    inner: EcdsaSignature,
}

impl Signature {
    /// Reconstructs a signature from its 64-byte `r || s` encoding.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = EcdsaSignature::from_slice(bytes).map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self { inner })
    }

    /// Parses a hex-encoded signature, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(strip_hex_prefix(s))?;
        Self::from_slice(&bytes)
    }

    /// Returns the 64-byte `r || s` encoding.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.inner.to_bytes().into()
    }

    /// Hex-encodes the `r || s` bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"transfer 250 to bob");
        assert!(key.public_key().verify(b"transfer 250 to bob", &sig));
    }

    #[test]
    fn bit_flipped_message_fails() {
        let key = PrivateKey::generate();
        let mut message = b"transfer 250 to bob".to_vec();
        let sig = key.sign(&message);
        message[0] ^= 0x01;
        assert!(!key.public_key().verify(&message, &sig));
    }

    #[test]
    fn wrong_key_fails() {
        let alice = PrivateKey::generate();
        let mallory = PrivateKey::generate();
        let sig = alice.sign(b"message");
        assert!(!mallory.public_key().verify(b"message", &sig));
    }

    #[test]
    fn private_key_hex_round_trip() {
        let key = PrivateKey::generate();
        let restored = PrivateKey::from_hex(&key.to_hex()).unwrap();
        // Same scalar means same public key and same address.
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn private_key_hex_accepts_prefix() {
        let key = PrivateKey::generate();
        let restored = PrivateKey::from_hex(&format!("0x{}", key.to_hex())).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn public_key_is_compressed_sec1() {
        let pk = PrivateKey::generate().public_key();
        assert_eq!(pk.as_bytes().len(), 33);
        // Compressed points start with 0x02 or 0x03.
        assert!(matches!(pk.as_bytes()[0], 0x02 | 0x03));
    }

    #[test]
    fn public_key_round_trip() {
        let pk = PrivateKey::generate().public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert_eq!(PublicKey::from_sec1_bytes(pk.as_bytes()).unwrap(), pk);
    }

    #[test]
    fn invalid_public_key_rejected() {
        assert!(PublicKey::from_sec1_bytes(&[0u8; 33]).is_err());
        assert!(PublicKey::from_sec1_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn address_is_stable_and_20_bytes() {
        let key = PrivateKey::generate();
        let addr = key.public_key().address();
        assert_eq!(addr.as_bytes().len(), 20);
        assert_eq!(key.public_key().address(), addr);
    }

    #[test]
    fn different_keys_different_addresses() {
        let a = PrivateKey::generate().public_key().address();
        let b = PrivateKey::generate().public_key().address();
        assert_ne!(a, b);
    }

    #[test]
    fn signature_bytes_round_trip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"payload");
        let restored = Signature::from_slice(&sig.to_bytes()).unwrap();
        assert_eq!(restored, sig);
        assert!(key.public_key().verify(b"payload", &restored));
    }

    #[test]
    fn signature_serde_round_trip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"payload");
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn public_key_serde_round_trip() {
        let pk = PrivateKey::generate().public_key();
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn debug_never_prints_private_scalar() {
        let key = PrivateKey::generate();
        let debug = format!("{:?}", key);
        assert!(!debug.contains(&key.to_hex()));
    }
}
