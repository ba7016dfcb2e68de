//! # Validator Loop
//!
//! Only the node constructed with a private key runs this. Every
//! `block_time` it seals whatever the mempool holds (possibly nothing)
//! into the next block:
//!
//! 1. Read the current tip header.
//! 2. Snapshot pending transactions (oldest-seen first).
//! 3. Build the successor header and sign it.
//! 4. `add_block` locally, which runs the full state transition.
//! 5. On success, clear pending and emit the block for broadcast.
//!
//! A failed attempt is logged and abandoned; the next tick rebuilds from
//! the then-current tip, so a transiently bad mempool (say, a transaction
//! whose nonce was consumed by a synced block in the meantime) never wedges
//! the loop permanently: the offending transactions are rejected again and
//! remain visible in the logs until they age out of relevance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::crypto::PrivateKey;
use crate::network::mempool::Mempool;
use crate::storage::block::Block;
use crate::storage::chain::{Chain, ChainError};

/// Periodically seals pending transactions into signed blocks.
pub struct BlockProducer {
    key: PrivateKey,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    block_time: Duration,
    block_broadcast: mpsc::Sender<Block>,
}

impl BlockProducer {
    /// Wires a producer to the chain, pool and broadcast channel.
    pub fn new(
        key: PrivateKey,
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        block_time: Duration,
        block_broadcast: mpsc::Sender<Block>,
    ) -> Self {
        Self {
            key,
            chain,
            mempool,
            block_time,
            block_broadcast,
        }
    }

    /// Runs the production loop until the broadcast channel closes.
    pub async fn run(self) {
        info!(
            block_time_ms = self.block_time.as_millis() as u64,
            validator = %self.key.public_key(),
            "starting validator loop"
        );

        let mut ticker = tokio::time::interval(self.block_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately; consume
        // it so the first block lands a full block-time after startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.seal_block() {
                Ok(block) => {
                    if self.block_broadcast.send(block).await.is_err() {
                        info!("broadcast channel closed, stopping validator loop");
                        break;
                    }
                }
                Err(e) => warn!(err = %e, "block production failed, waiting for next tick"),
            }
        }
    }

    /// Builds, signs and locally applies one block from the current tip and
    /// pending pool. Pending is cleared only on success.
    pub fn seal_block(&self) -> Result<Block, ChainError> {
        let tip = self.chain.tip();
        let pending = self.mempool.pending();

        let mut block = Block::from_prev_header(&tip, pending);
        block.sign(&self.key);

        self.chain.add_block(&block)?;
        self.mempool.clear_pending();

        info!(
            hash = %block.hash(),
            height = block.header.height,
            transactions = block.transactions.len(),
            "sealed new block"
        );
        Ok(block)
    }
}
