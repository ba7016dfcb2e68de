//! # Transactions
//!
//! A transaction moves `value` units from the signer's account to `to`,
//! carries an arbitrary opaque `data` payload, and is replay-protected by a
//! strict per-sender `nonce`.
//!
//! ## Canonical signed subset
//!
//! The transaction hash and the signed payload cover exactly
//! `{data, to, value, nonce}`, never `from` or `signature`. Two
//! consequences worth spelling out:
//!
//! 1. Signing a transaction does not change its hash, and re-signing with a
//!    different key produces the same hash.
//! 2. Empty `data` is normalized to a zero-length sequence before hashing,
//!    so a codec that could distinguish "absent" from "empty" cannot split
//!    one logical transaction into two hashes.

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::hash::sha256;
use crate::crypto::{PrivateKey, PublicKey, Signature};
use crate::types::{Address, Hash};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A transaction failed stateless verification.
///
/// Stateful checks (nonce, balance) live in the state layer; this is purely
/// about the signature.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction is unsigned")]
    Unsigned,

    #[error("transaction signature is invalid")]
    InvalidSignature,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A signed balance transfer.
///
/// `from` and `signature` are `None` until [`Transaction::sign`] runs; an
/// unsigned transaction is only useful as a construction intermediate and is
/// rejected everywhere else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque payload bytes. The protocol carries them, it does not
    /// interpret them.
    pub data: Vec<u8>,
    /// Recipient account.
    pub to: Address,
    /// Transfer amount in units.
    pub value: u64,
    /// Sender sequence number. Must equal the sender account's current
    /// nonce exactly: no gaps, no replays.
    pub nonce: u64,
    /// Sender public key, set at signing time.
    pub from: Option<PublicKey>,
    /// Signature over the canonical signed subset.
    pub signature: Option<Signature>,
}

/// The exact byte image that gets hashed and signed.
///
/// A dedicated borrow-struct rather than a re-serialization of the whole
/// transaction: adding a field to [`Transaction`] can never silently change
/// what a signature commits to.
#[derive(Serialize)]
struct SignedSubset<'a> {
    data: &'a [u8],
    to: &'a Address,
    value: u64,
    nonce: u64,
}

impl Transaction {
    /// Creates an unsigned transaction.
    pub fn new(data: Vec<u8>, to: Address, value: u64, nonce: u64) -> Self {
        Self {
            data,
            to,
            value,
            nonce,
            from: None,
            signature: None,
        }
    }

    /// Computes the transaction hash: SHA-256 over the encoded signed subset.
    pub fn hash(&self) -> Hash {
        sha256(&self.signing_bytes())
    }

    /// Signs the canonical subset and attaches the signer's public key.
    pub fn sign(&mut self, key: &PrivateKey) {
        let bytes = self.signing_bytes();
        self.signature = Some(key.sign(&bytes));
        self.from = Some(key.public_key());
    }

    /// Verifies the signature against the embedded sender public key.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let (from, signature) = match (&self.from, &self.signature) {
            (Some(from), Some(signature)) => (from, signature),
            _ => return Err(TransactionError::Unsigned),
        };
        if !from.verify(&self.signing_bytes(), signature) {
            return Err(TransactionError::InvalidSignature);
        }
        Ok(())
    }

    /// Returns the sender address, if the transaction has been signed.
    pub fn sender(&self) -> Option<Address> {
        self.from.as_ref().map(PublicKey::address)
    }

    /// Encodes the canonical signed subset.
    fn signing_bytes(&self) -> Vec<u8> {
        let subset = SignedSubset {
            data: &self.data,
            to: &self.to,
            value: self.value,
            nonce: self.nonce,
        };
        codec::encode(&subset).expect("signed subset serialization is infallible")
    }
}
