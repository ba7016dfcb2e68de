//! # Hashing
//!
//! SHA-256 is the only hash function in QUARTZ. Transaction IDs, header
//! hashes, data hashes and address derivation all go through it, so there is
//! exactly one 32-byte digest type in the system and no conversion layer.

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Computes the SHA-256 digest of `data` as a [`Hash`].
///
/// This is the workhorse of the crate; every identifier ultimately comes
/// out of this function.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash::from_bytes(hasher.finalize().into())
}
