//! # Headers & Blocks
//!
//! A block is a header, an ordered transaction list, and the validator's
//! signature over the encoded header. The header commits to everything that
//! matters:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Header                                      │
//! │  ├── version: u32                            │
//! │  ├── prev_block_hash: Hash   (zero @ genesis)│
//! │  ├── data_hash: Hash         (over the txs)  │
//! │  ├── timestamp: i64          (unix nanos)    │
//! │  ├── height: u32                             │
//! │  └── nonce: u64              (reserved)      │
//! ├──────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>              │
//! │  validator: PublicKey   signature: Signature │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The block hash is the SHA-256 of the encoded header; the signature covers
//! those same header bytes. Because `data_hash` is inside the header, the
//! signature transitively commits to the transaction list.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config;
use crate::crypto::hash::sha256;
use crate::crypto::{PrivateKey, PublicKey, Signature};
use crate::transaction::{Transaction, TransactionError};
use crate::types::Hash;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A block failed structural verification.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block is unsigned")]
    Unsigned,

    #[error("block signature does not verify against its validator key")]
    InvalidSignature,

    #[error("data hash mismatch: header commits to {header}, transactions hash to {computed}")]
    DataHashMismatch { header: Hash, computed: Hash },

    #[error("invalid transaction in block: {0}")]
    InvalidTransaction(#[from] TransactionError),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header format version, propagated from the previous block.
    pub version: u32,
    /// Hash of the previous block's header. Zero for genesis.
    pub prev_block_hash: Hash,
    /// Hash over this block's transaction list.
    pub data_hash: Hash,
    /// Production time, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Block height; genesis is 0.
    pub height: u32,
    /// Reserved for future use. Always 0 today.
    pub nonce: u64,
}

impl Header {
    /// The header's hash: SHA-256 over its canonical encoding.
    pub fn hash(&self) -> Hash {
        sha256(&encode_header(self))
    }
}

/// Encodes a header for hashing and signing.
fn encode_header(header: &Header) -> Vec<u8> {
    codec::encode(header).expect("header serialization is infallible")
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A full block: header, transactions, and the producer's signature.
///
/// `validator` and `signature` are `None` only on the genesis block, which
/// is deterministic and installed without validation on every peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Metadata and chain linkage.
    pub header: Header,
    /// Ordered transactions sealed into this block.
    pub transactions: Vec<Transaction>,
    /// Public key of the validator that produced this block.
    pub validator: Option<PublicKey>,
    /// Validator signature over the encoded header.
    pub signature: Option<Signature>,
}

impl Block {
    /// Assembles an unsigned block from parts.
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            validator: None,
            signature: None,
        }
    }

    /// Builds the unsigned successor of `prev` containing `transactions`.
    ///
    /// Version is inherited, height increments, the previous hash links the
    /// chain, and the data hash commits to the transaction list.
    pub fn from_prev_header(prev: &Header, transactions: Vec<Transaction>) -> Self {
        let header = Header {
            version: prev.version,
            prev_block_hash: prev.hash(),
            data_hash: data_hash(&transactions),
            timestamp: unix_nanos(),
            height: prev.height + 1,
            nonce: 0,
        };
        Self::new(header, transactions)
    }

    /// The deterministic block at height 0, identical on every peer.
    ///
    /// Genesis carries no transactions and no signature; peers install it
    /// without validation on first start.
    pub fn genesis(timestamp: i64) -> Self {
        let header = Header {
            version: config::HEADER_VERSION,
            prev_block_hash: Hash::zero(),
            data_hash: data_hash(&[]),
            timestamp,
            height: 0,
            nonce: 0,
        };
        Self::new(header, Vec::new())
    }

    /// The block hash, i.e. the hash of the header.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Signs the encoded header and attaches the validator's public key.
    pub fn sign(&mut self, key: &PrivateKey) {
        let bytes = encode_header(&self.header);
        self.signature = Some(key.sign(&bytes));
        self.validator = Some(key.public_key());
    }

    /// Verifies block integrity.
    ///
    /// 1. The validator signature covers the encoded header.
    /// 2. Every contained transaction verifies.
    /// 3. The recomputed data hash matches the header commitment.
    pub fn verify(&self) -> Result<(), BlockError> {
        let (validator, signature) = match (&self.validator, &self.signature) {
            (Some(validator), Some(signature)) => (validator, signature),
            _ => return Err(BlockError::Unsigned),
        };

        if !validator.verify(&encode_header(&self.header), signature) {
            return Err(BlockError::InvalidSignature);
        }

        for tx in &self.transactions {
            tx.verify()?;
        }

        let computed = data_hash(&self.transactions);
        if computed != self.header.data_hash {
            return Err(BlockError::DataHashMismatch {
                header: self.header.data_hash,
                computed,
            });
        }

        Ok(())
    }
}

/// Hashes a transaction list for the header's `data_hash` commitment.
///
/// The empty list hashes to a fixed, non-zero value: the data hash of every
/// empty block on every peer.
pub fn data_hash(transactions: &[Transaction]) -> Hash {
    let encoded = codec::encode(&transactions).expect("transaction list serialization is infallible");
    sha256(&encoded)
}

/// Current time as nanoseconds since the Unix epoch.
fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_nanos() as i64
}
