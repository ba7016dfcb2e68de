//! # Storage Engine
//!
//! The persistence layer is a flat key/value contract plus three block-aware
//! operations, implemented on sled's embedded store. All on-disk data flows
//! through this module.
//!
//! ## Key Layout
//!
//! A single keyspace with three disjoint one-byte prefixes, chosen so that
//! the core never needs iteration; every lookup is a point read:
//!
//! | Prefix | Key                              | Value               |
//! |--------|----------------------------------|---------------------|
//! | `h`    | `'h' + decimal ASCII height`     | 32-byte block hash  |
//! | `b`    | `'b' + 32-byte block hash`       | encoded block       |
//! | `a`    | `'a' + 20-byte address`          | encoded account     |
//!
//! Height keys use human-readable decimal: heights are only ever point-read
//! (tip discovery probes them one by one), so lexicographic ordering of the
//! keyspace is irrelevant and the legible form wins.
//!
//! ## Atomicity
//!
//! [`Storage::put_block`] writes the height→hash index entry and the
//! hash→block record in one [`sled::Batch`]. Either both land or neither
//! does, so a crash can never leave an indexed height pointing at a missing
//! block.

use std::path::Path;

use crate::codec::{self, CodecError};
use crate::storage::block::Block;
use crate::types::{Hash, TypeError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by storage implementations.
///
/// `NotFound` is a distinguished kind: the state layer maps it to the zero
/// account and chain bootstrap uses it to find the tip. Everything else is
/// fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found")]
    NotFound,

    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Decode(#[from] CodecError),

    #[error("corrupt record: {0}")]
    Record(#[from] TypeError),
}

// ---------------------------------------------------------------------------
// Storage contract
// ---------------------------------------------------------------------------

/// The persistence capability injected into chain and state.
///
/// Implementations must be safe for concurrent point reads and writes; a
/// single-writer batched database qualifies.
pub trait Storage: Send + Sync {
    /// Stores `value` under `key`, overwriting any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Loads the value under `key`, or `StorageError::NotFound`.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Persists a block under both its height index and its hash, atomically.
    fn put_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Loads a block by its header hash.
    fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StorageError>;

    /// Resolves a height to the hash of the block stored there.
    fn get_block_hash_by_height(&self, height: u32) -> Result<Hash, StorageError>;

    /// Flushes and releases the underlying database.
    fn close(&self) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Key construction
// ---------------------------------------------------------------------------

const HEIGHT_PREFIX: u8 = b'h';
const BLOCK_PREFIX: u8 = b'b';

fn height_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 10);
    key.push(HEIGHT_PREFIX);
    key.extend_from_slice(height.to_string().as_bytes());
    key
}

fn block_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + Hash::LENGTH);
    key.push(BLOCK_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// SledStorage
// ---------------------------------------------------------------------------

/// Sled-backed [`Storage`] implementation.
///
/// sled supports lock-free concurrent reads and serialized writes, so a
/// `SledStorage` can be shared across threads behind a plain `Arc`.
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    /// Opens (or creates) a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Creates a temporary database that vanishes on drop.
    ///
    /// Ideal for tests: no filesystem side effects, no cleanup.
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl Storage for SledStorage {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        match self.db.get(key)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StorageError::NotFound),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn put_block(&self, block: &Block) -> Result<(), StorageError> {
        let hash = block.hash();
        let encoded = codec::encode(block)?;

        let mut batch = sled::Batch::default();
        batch.insert(height_key(block.header.height), hash.to_vec());
        batch.insert(block_key(&hash), encoded);
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_block_by_hash(&self, hash: &Hash) -> Result<Block, StorageError> {
        let bytes = self.get(&block_key(hash))?;
        Ok(codec::decode(&bytes)?)
    }

    fn get_block_hash_by_height(&self, height: u32) -> Result<Hash, StorageError> {
        let bytes = self.get(&height_key(height))?;
        Ok(Hash::from_slice(&bytes)?)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
