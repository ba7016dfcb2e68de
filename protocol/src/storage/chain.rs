//! # The Header Chain
//!
//! `Chain` owns the in-memory sequence of headers (indexed by height), a
//! storage handle for block and account durability, and the validation rules
//! that keep the sequence linear.
//!
//! ## Bootstrap
//!
//! Construction probes storage for heights ascending from 0. The first
//! `NotFound` marks the tip; an empty database installs the supplied genesis
//! block without validation. There is no separate "latest height" marker to
//! drift out of sync with the data; the index entries themselves are the
//! source of truth.
//!
//! ## Locking
//!
//! One reader/writer lock guards the header vector. `add_block` is the sole
//! writer and holds the lock across validate → apply-state → persist →
//! append, so two concurrent adds are totally ordered: the loser revalidates
//! against the new tip and fails the height check instead of forking.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::storage::block::{Block, BlockError, Header};
use crate::storage::db::{Storage, StorageError};
use crate::storage::state::{State, StateError};
use crate::types::Hash;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A block was rejected by the chain, or an operation fell off the chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("block at height {height} already exists")]
    DuplicateHeight { height: u32 },

    #[error("block height {got} does not extend current tip {tip}")]
    NonSequentialHeight { got: u32, tip: u32 },

    #[error("previous hash mismatch at height {height}: expected {expected}, got {got}")]
    PrevHashMismatch {
        height: u32,
        expected: Hash,
        got: Hash,
    },

    #[error("header height {height} beyond tip {tip}")]
    OutOfRange { height: u32, tip: u32 },

    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("state transition failed: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// The linear block chain: headers in memory, blocks and accounts on disk.
pub struct Chain {
    headers: RwLock<Vec<Header>>,
    store: Arc<dyn Storage>,
    state: State,
}

impl Chain {
    /// Opens the chain over `store`.
    ///
    /// Reloads headers from disk by probing heights from 0 upward; if the
    /// database is empty, installs `genesis` without validation instead.
    pub fn new(store: Arc<dyn Storage>, genesis: Block) -> Result<Self, ChainError> {
        let state = State::new(Arc::clone(&store));
        let chain = Self {
            headers: RwLock::new(Vec::new()),
            store,
            state,
        };

        let loaded = chain.load_headers()?;
        if loaded == 0 {
            info!("database empty, installing genesis block");
            chain.add_block_without_validation(&genesis)?;
        } else {
            info!(count = loaded, "loaded headers from disk");
        }
        Ok(chain)
    }

    /// Probes storage ascending from height 0, appending each found header.
    /// Returns the number of headers loaded.
    fn load_headers(&self) -> Result<usize, ChainError> {
        let mut headers = self.headers.write();
        let mut height: u32 = 0;
        loop {
            let hash = match self.store.get_block_hash_by_height(height) {
                Ok(hash) => hash,
                Err(StorageError::NotFound) => break,
                Err(e) => return Err(e.into()),
            };
            let block = self.store.get_block_by_hash(&hash)?;
            headers.push(block.header);
            height += 1;
        }
        Ok(headers.len())
    }

    /// Height of the tip. Genesis is height 0.
    pub fn height(&self) -> u32 {
        let headers = self.headers.read();
        headers.len() as u32 - 1
    }

    /// Returns the header at `height`, or `OutOfRange` beyond the tip.
    pub fn get_header(&self, height: u32) -> Result<Header, ChainError> {
        let headers = self.headers.read();
        headers
            .get(height as usize)
            .cloned()
            .ok_or(ChainError::OutOfRange {
                height,
                tip: headers.len() as u32 - 1,
            })
    }

    /// Returns the tip header.
    pub fn tip(&self) -> Header {
        let headers = self.headers.read();
        headers
            .last()
            .cloned()
            .expect("chain always holds at least the genesis header")
    }

    /// Validates `block`, applies its state transition, persists it, and
    /// appends its header, all under the write lock, all or nothing.
    pub fn add_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut headers = self.headers.write();
        Self::validate(&headers, block)?;
        self.state.apply_block(&block.transactions)?;
        self.store.put_block(block)?;
        headers.push(block.header.clone());

        info!(
            hash = %block.hash(),
            height = block.header.height,
            transactions = block.transactions.len(),
            "block added"
        );
        Ok(())
    }

    /// Appends a block with no validation and no state transition.
    ///
    /// Only for the genesis bootstrap, where the block is deterministic and
    /// carries no transactions.
    pub fn add_block_without_validation(&self, block: &Block) -> Result<(), ChainError> {
        let mut headers = self.headers.write();
        self.store.put_block(block)?;
        headers.push(block.header.clone());

        info!(
            hash = %block.hash(),
            height = block.header.height,
            transactions = block.transactions.len(),
            "block added without validation"
        );
        Ok(())
    }

    /// Reads up to `count` blocks starting at `from_height`, clipped to the
    /// tip. A start beyond the tip yields an empty list, not an error.
    pub fn get_blocks(&self, from_height: u32, count: usize) -> Result<Vec<Block>, ChainError> {
        let headers = self.headers.read();
        let tip = headers.len() as u32 - 1;
        if from_height > tip {
            return Ok(Vec::new());
        }

        let available = (tip - from_height + 1) as usize;
        let take = count.min(available);
        let mut blocks = Vec::with_capacity(take);
        for offset in 0..take {
            let height = from_height + offset as u32;
            let hash = self.store.get_block_hash_by_height(height)?;
            blocks.push(self.store.get_block_by_hash(&hash)?);
        }
        Ok(blocks)
    }

    /// The account state facade backed by the same storage.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The four rejection rules, checked against the locked header sequence.
    fn validate(headers: &[Header], block: &Block) -> Result<(), ChainError> {
        let tip = headers.len() as u32 - 1;

        if block.header.height <= tip {
            return Err(ChainError::DuplicateHeight {
                height: block.header.height,
            });
        }
        if block.header.height != tip + 1 {
            return Err(ChainError::NonSequentialHeight {
                got: block.header.height,
                tip,
            });
        }

        let prev = &headers[(block.header.height - 1) as usize];
        let expected = prev.hash();
        if block.header.prev_block_hash != expected {
            return Err(ChainError::PrevHashMismatch {
                height: block.header.height,
                expected,
                got: block.header.prev_block_hash,
            });
        }

        block.verify()?;
        Ok(())
    }
}
