//! # Dispatcher & Message Handlers
//!
//! One worker drains the inbound RPC channel, decodes the outer message
//! tag, and runs the handler that owns it. Handlers execute inline on the
//! dispatcher task; the only work they push elsewhere is transaction
//! re-broadcast, which goes through a channel so a slow network path can
//! never stall message intake.
//!
//! A malformed frame or a failed handler is a log line and a `continue`;
//! one bad peer message never takes the node down.
//!
//! ## Catch-up
//!
//! The same handler set implements the pull-based sync protocol. On every
//! peer-up event the node probes with `GetStatus`; a `Status` showing a
//! taller peer triggers a `GetBlocks` ladder that keeps climbing while full
//! batches arrive (see [`super::sync`]). The serving side is stateless:
//! each `GetBlocks` is answered from the chain, clipped to the tip.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError};
use crate::network::mempool::{Mempool, MempoolError};
use crate::network::message::{
    BlocksPayload, GetBlocksPayload, GetStatusPayload, Message, MessageType, StatusPayload,
};
use crate::network::sync;
use crate::network::transport::{NetAddr, Rpc, TcpPeer, TcpTransport, TransportError};
use crate::storage::block::Block;
use crate::storage::chain::{Chain, ChainError};
use crate::transaction::{Transaction, TransactionError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Anything a message handler can fail with. All variants are logged by the
/// dispatcher and none of them stop it.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The message-handling half of a running node: chain, mempool and the
/// transport it replies through.
pub struct Node {
    id: String,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    transport: Arc<TcpTransport>,
    tx_broadcast: mpsc::Sender<Transaction>,
}

impl Node {
    /// Wires the handler set to its collaborators.
    pub fn new(
        id: impl Into<String>,
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        transport: Arc<TcpTransport>,
        tx_broadcast: mpsc::Sender<Transaction>,
    ) -> Self {
        Self {
            id: id.into(),
            chain,
            mempool,
            transport,
            tx_broadcast,
        }
    }

    /// The dispatcher loop: inbound RPCs, peer-up events, and the quit
    /// signal, all in one select.
    pub async fn run(
        self,
        mut rpc_rx: mpsc::Receiver<Rpc>,
        mut peer_rx: mpsc::Receiver<Arc<TcpPeer>>,
        mut quit: oneshot::Receiver<()>,
    ) {
        info!(id = %self.id, "dispatcher started");
        loop {
            tokio::select! {
                maybe_rpc = rpc_rx.recv() => match maybe_rpc {
                    Some(rpc) => {
                        let from = rpc.from.clone();
                        if let Err(e) = self.process_rpc(rpc).await {
                            warn!(err = %e, from = %from, "message handling failed");
                        }
                    }
                    None => break,
                },
                maybe_peer = peer_rx.recv() => match maybe_peer {
                    Some(peer) => {
                        if let Err(e) = self.on_peer(&peer).await {
                            warn!(err = %e, peer = %peer.remote_addr(), "peer probe failed");
                        }
                    }
                    None => break,
                },
                _ = &mut quit => {
                    info!(id = %self.id, "dispatcher received quit signal");
                    break;
                }
            }
        }
        info!(id = %self.id, "dispatcher stopped");
    }

    /// Decodes the outer envelope and routes by tag.
    pub async fn process_rpc(&self, rpc: Rpc) -> Result<(), NodeError> {
        let message = Message::from_bytes(&rpc.payload)?;
        match message.header {
            MessageType::Tx => self.handle_transaction(message.payload()?),
            MessageType::Block => self.handle_block(message.payload()?),
            MessageType::GetStatus => self.handle_get_status(&rpc.from).await,
            MessageType::Status => self.handle_status(&rpc.from, message.payload()?).await,
            MessageType::GetBlocks => self.handle_get_blocks(&rpc.from, message.payload()?).await,
            MessageType::Blocks => self.handle_blocks(&rpc.from, message.payload()?).await,
        }
    }

    /// Probes a freshly registered peer for its chain status. Replies go
    /// straight through the shared peer handle, since the peer may not be
    /// reachable by address yet from this side's registry.
    pub async fn on_peer(&self, peer: &TcpPeer) -> Result<(), NodeError> {
        info!(peer = %peer.remote_addr(), "new peer, requesting status");
        let message = Message::new(MessageType::GetStatus, &GetStatusPayload::default())?;
        peer.send(&message.to_bytes()?).await?;
        Ok(())
    }

    /// Admits a gossiped transaction: dedup, verify, pool, re-broadcast.
    pub fn handle_transaction(&self, tx: Transaction) -> Result<(), NodeError> {
        let hash = tx.hash();
        if self.mempool.contains(&hash) {
            // Duplicate gossip is business as usual, not an error.
            return Ok(());
        }

        tx.verify()?;
        self.mempool.add(tx.clone())?;
        debug!(
            hash = %hash,
            pending = self.mempool.pending_count(),
            "admitted transaction to mempool"
        );

        // Re-broadcast off the dispatcher task; the worker owns the wire.
        let forward = self.tx_broadcast.clone();
        tokio::spawn(async move {
            let _ = forward.send(tx).await;
        });
        Ok(())
    }

    /// Applies a gossiped block and drops its transactions from the pool.
    pub fn handle_block(&self, block: Block) -> Result<(), NodeError> {
        self.chain.add_block(&block)?;
        self.mempool.flush(&block.transactions);
        Ok(())
    }

    /// Answers a status probe with our identity and tip height.
    async fn handle_get_status(&self, from: &NetAddr) -> Result<(), NodeError> {
        let status = StatusPayload {
            id: self.id.clone(),
            current_height: self.chain.height(),
        };
        debug!(to = %from, height = status.current_height, "sending status");
        self.reply(from, MessageType::Status, &status).await
    }

    /// Starts the catch-up ladder if the peer is ahead of us.
    async fn handle_status(&self, from: &NetAddr, status: StatusPayload) -> Result<(), NodeError> {
        let local = self.chain.height();
        match sync::catch_up_request(local, status.current_height) {
            Some(request) => {
                info!(
                    peer = %from,
                    peer_id = %status.id,
                    peer_height = status.current_height,
                    local_height = local,
                    "peer is ahead, starting catch-up"
                );
                self.reply(from, MessageType::GetBlocks, &request).await
            }
            None => {
                debug!(peer = %from, peer_height = status.current_height, "no sync needed");
                Ok(())
            }
        }
    }

    /// Serves a bounded batch of blocks, clipped to our tip. Stateless:
    /// each request is answered in full from the chain.
    async fn handle_get_blocks(
        &self,
        from: &NetAddr,
        request: GetBlocksPayload,
    ) -> Result<(), NodeError> {
        let entitled = sync::batch_size(request.from, request.to);
        let blocks = self.chain.get_blocks(request.from, entitled)?;

        let mut encoded = Vec::with_capacity(blocks.len());
        for block in &blocks {
            encoded.push(codec::encode(block)?);
        }
        debug!(
            to = %from,
            from_height = request.from,
            count = encoded.len(),
            "serving blocks"
        );
        self.reply(from, MessageType::Blocks, &BlocksPayload { blocks: encoded })
            .await
    }

    /// Applies a received batch in order; a full batch triggers the next
    /// request, a short one ends the catch-up. Any validation failure halts
    /// sync with this peer; other peers are unaffected.
    async fn handle_blocks(&self, from: &NetAddr, payload: BlocksPayload) -> Result<(), NodeError> {
        if payload.blocks.is_empty() {
            debug!(peer = %from, "peer served no blocks, sync complete");
            return Ok(());
        }

        let batch_len = payload.blocks.len();
        for raw in &payload.blocks {
            let block: Block = codec::decode(raw)?;
            let height = block.header.height;
            if let Err(e) = self.chain.add_block(&block) {
                warn!(
                    peer = %from,
                    height,
                    err = %e,
                    "synced block rejected, halting sync with this peer"
                );
                return Err(e.into());
            }
            self.mempool.flush(&block.transactions);
        }

        if sync::wants_more_after(batch_len) {
            let request = GetBlocksPayload {
                from: self.chain.height() + 1,
                to: 0,
            };
            debug!(peer = %from, from_height = request.from, "full batch, requesting next");
            self.reply(from, MessageType::GetBlocks, &request).await
        } else {
            info!(peer = %from, height = self.chain.height(), "catch-up complete");
            Ok(())
        }
    }

    /// Encodes and unicasts a typed reply.
    async fn reply<T: serde::Serialize>(
        &self,
        to: &NetAddr,
        header: MessageType,
        payload: &T,
    ) -> Result<(), NodeError> {
        let message = Message::new(header, payload)?;
        self.transport.send_message(to, &message.to_bytes()?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::crypto::PrivateKey;
    use crate::storage::db::{SledStorage, Storage};
    use crate::storage::state::AccountState;
    use crate::types::Address;

    fn make_node() -> (Node, Arc<Chain>, Arc<Mempool>, mpsc::Receiver<Transaction>) {
        let store: Arc<dyn Storage> = Arc::new(SledStorage::open_temporary().unwrap());
        let chain = Arc::new(Chain::new(store, Block::genesis(0)).unwrap());
        let mempool = Arc::new(Mempool::new(config::DEFAULT_MEMPOOL_CAPACITY));
        let transport = Arc::new(TcpTransport::new("127.0.0.1:0"));
        let (tx_broadcast, tx_rx) = mpsc::channel(config::BROADCAST_CHANNEL_CAPACITY);
        let node = Node::new(
            "NODE-test",
            Arc::clone(&chain),
            Arc::clone(&mempool),
            transport,
            tx_broadcast,
        );
        (node, chain, mempool, tx_rx)
    }

    fn funded_transfer(chain: &Chain, value: u64) -> (PrivateKey, Transaction) {
        let key = PrivateKey::generate();
        chain
            .state()
            .put(&AccountState::with_balance(
                key.public_key().address(),
                1_000,
            ))
            .unwrap();
        let mut tx = Transaction::new(Vec::new(), Address::from_bytes([0x22; 20]), value, 0);
        tx.sign(&key);
        (key, tx)
    }

    #[tokio::test]
    async fn transaction_is_admitted_and_forwarded() {
        let (node, chain, mempool, mut tx_rx) = make_node();
        let (_key, tx) = funded_transfer(&chain, 100);
        let hash = tx.hash();

        node.handle_transaction(tx).unwrap();

        assert!(mempool.contains(&hash));
        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(5), tx_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.hash(), hash);
    }

    #[tokio::test]
    async fn duplicate_transaction_is_a_noop() {
        let (node, chain, mempool, _tx_rx) = make_node();
        let (_key, tx) = funded_transfer(&chain, 100);

        node.handle_transaction(tx.clone()).unwrap();
        node.handle_transaction(tx).unwrap();

        assert_eq!(mempool.pending_count(), 1);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected() {
        let (node, chain, mempool, _tx_rx) = make_node();
        let (_key, mut tx) = funded_transfer(&chain, 100);
        tx.value = 999; // break the signature

        assert!(matches!(
            node.handle_transaction(tx),
            Err(NodeError::Transaction(_))
        ));
        assert_eq!(mempool.pending_count(), 0);
    }

    #[tokio::test]
    async fn gossiped_block_is_applied_and_flushes_pool() {
        let (node, chain, mempool, _tx_rx) = make_node();
        let validator = PrivateKey::generate();
        let (_key, tx) = funded_transfer(&chain, 100);

        mempool.add(tx.clone()).unwrap();

        let mut block = Block::from_prev_header(&chain.tip(), vec![tx.clone()]);
        block.sign(&validator);
        node.handle_block(block).unwrap();

        assert_eq!(chain.height(), 1);
        assert!(!mempool.contains(&tx.hash()));
    }

    #[tokio::test]
    async fn bad_block_is_rejected() {
        let (node, chain, _mempool, _tx_rx) = make_node();
        let validator = PrivateKey::generate();

        let mut block = Block::from_prev_header(&chain.tip(), Vec::new());
        block.header.height = 7; // gap
        block.sign(&validator);

        assert!(matches!(
            node.handle_block(block),
            Err(NodeError::Chain(ChainError::NonSequentialHeight { .. }))
        ));
        assert_eq!(chain.height(), 0);
    }

    #[tokio::test]
    async fn malformed_frame_is_an_error_not_a_panic() {
        let (node, _chain, _mempool, _tx_rx) = make_node();
        let rpc = Rpc {
            from: "203.0.113.1:1".into(),
            payload: b"\x00\xFFdefinitely not a message".to_vec(),
        };
        assert!(matches!(
            node.process_rpc(rpc).await,
            Err(NodeError::Codec(_))
        ));
    }
}
