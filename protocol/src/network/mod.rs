//! Networking: transport, messages, mempool, dispatch, sync and block
//! production.
//!
//! Data flows one way: the [`transport`] produces framed payloads, the
//! [`node`] dispatcher decodes and routes them into the [`mempool`] and the
//! chain, the [`producer`] seals pending transactions on a timer, and the
//! [`broadcast`] worker pushes sealed blocks and admitted transactions back
//! out through the transport. [`sync`] holds the catch-up decision logic.

pub mod broadcast;
pub mod mempool;
pub mod message;
pub mod node;
pub mod producer;
pub mod sync;
pub mod transport;

pub use broadcast::BroadcastService;
pub use mempool::{Mempool, MempoolError};
pub use message::{
    BlocksPayload, GetBlocksPayload, GetStatusPayload, Message, MessageType, StatusPayload,
};
pub use node::{Node, NodeError};
pub use producer::BlockProducer;
pub use transport::{NetAddr, Rpc, TcpPeer, TcpTransport, TransportError};
