//! Cryptographic primitives: ECDSA identities and the protocol hash.
//!
//! QUARTZ authenticates everything with ECDSA over NIST P-256. Inputs are
//! hashed with SHA-256 before the raw curve operation, on both the signing
//! and the verifying side, so a signature commits to the full message.

pub mod hash;
pub mod keys;

pub use hash::sha256;
pub use keys::{CryptoError, PrivateKey, PublicKey, Signature};
