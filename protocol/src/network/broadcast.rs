//! # Broadcast Worker
//!
//! Producers of outbound traffic (the validator loop, transaction
//! admission) never touch the transport directly. They push onto one of two
//! channels and this worker does the rest: wrap the payload in its typed
//! [`Message`], encode it, and fan it out to every connected peer.
//!
//! The indirection keeps the network path out of the dispatcher's and the
//! validator's critical sections, and gives outbound traffic a single choke
//! point that is trivial to reason about.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::codec::CodecError;
use crate::config;
use crate::network::message::{Message, MessageType};
use crate::network::transport::TcpTransport;
use crate::storage::block::Block;
use crate::transaction::Transaction;

/// Serializes and broadcasts blocks and transactions handed to it over its
/// two channels. Runs until both senders are dropped.
pub struct BroadcastService {
    transport: Arc<TcpTransport>,
    block_rx: mpsc::Receiver<Block>,
    tx_rx: mpsc::Receiver<Transaction>,
}

impl BroadcastService {
    /// Creates the worker plus the two producer handles feeding it.
    pub fn new(
        transport: Arc<TcpTransport>,
    ) -> (Self, mpsc::Sender<Block>, mpsc::Sender<Transaction>) {
        let (block_tx, block_rx) = mpsc::channel(config::BROADCAST_CHANNEL_CAPACITY);
        let (tx_tx, tx_rx) = mpsc::channel(config::BROADCAST_CHANNEL_CAPACITY);
        (
            Self {
                transport,
                block_rx,
                tx_rx,
            },
            block_tx,
            tx_tx,
        )
    }

    /// Drains both channels until every producer handle is gone.
    pub async fn run(mut self) {
        info!("starting broadcast service");
        loop {
            tokio::select! {
                Some(block) = self.block_rx.recv() => {
                    if let Err(e) = self.broadcast_block(&block).await {
                        error!(err = %e, height = block.header.height, "failed to broadcast block");
                    }
                }
                Some(tx) = self.tx_rx.recv() => {
                    if let Err(e) = self.broadcast_transaction(&tx).await {
                        error!(err = %e, hash = %tx.hash(), "failed to broadcast transaction");
                    }
                }
                else => break,
            }
        }
        info!("broadcast service stopped");
    }

    async fn broadcast_block(&self, block: &Block) -> Result<(), CodecError> {
        debug!(hash = %block.hash(), height = block.header.height, "broadcasting block");
        let frame = Message::new(MessageType::Block, block)?.to_bytes()?;
        self.transport.broadcast(&frame).await;
        Ok(())
    }

    async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), CodecError> {
        debug!(hash = %tx.hash(), "broadcasting transaction");
        let frame = Message::new(MessageType::Tx, tx)?.to_bytes()?;
        self.transport.broadcast(&frame).await;
        Ok(())
    }
}
