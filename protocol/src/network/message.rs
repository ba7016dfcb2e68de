//! # The Wire Message Set
//!
//! Every frame on the wire carries exactly one [`Message`]: a one-byte type
//! tag plus the encoded payload for that tag. The tag is the only dispatch
//! mechanism in the protocol; handlers never sniff payload contents.
//!
//! | Tag | Name      | Payload                                   |
//! |-----|-----------|-------------------------------------------|
//! | 0x1 | Tx        | encoded [`Transaction`]                   |
//! | 0x2 | Block     | encoded [`Block`]                         |
//! | 0x3 | GetStatus | empty                                     |
//! | 0x4 | Status    | `{ id, current_height }`                  |
//! | 0x5 | GetBlocks | `{ from, to }` (`to = 0`: up to the cap)  |
//! | 0x6 | Blocks    | `{ blocks: [encoded block, ...] }`        |
//!
//! [`Transaction`]: crate::transaction::Transaction
//! [`Block`]: crate::storage::block::Block

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The one-byte tag on every outer message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// A gossiped transaction.
    Tx = 0x1,
    /// A gossiped block.
    Block = 0x2,
    /// Probe a peer for its chain status.
    GetStatus = 0x3,
    /// Reply to `GetStatus`.
    Status = 0x4,
    /// Request a bounded range of blocks.
    GetBlocks = 0x5,
    /// Reply to `GetBlocks`.
    Blocks = 0x6,
}

/// A tag byte that maps to no known message type.
#[derive(Debug, thiserror::Error)]
#[error("unknown message type tag: {0:#04x}")]
pub struct UnknownMessageType(pub u8);

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(Self::Tx),
            0x2 => Ok(Self::Block),
            0x3 => Ok(Self::GetStatus),
            0x4 => Ok(Self::Status),
            0x5 => Ok(Self::GetBlocks),
            0x6 => Ok(Self::Blocks),
            other => Err(UnknownMessageType(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The outer envelope: a type tag and the encoded inner payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Dispatch tag.
    pub header: MessageType,
    /// Codec-encoded payload for `header`.
    pub data: Vec<u8>,
}

impl Message {
    /// Encodes `payload` and wraps it under `header`.
    pub fn new<T: Serialize>(header: MessageType, payload: &T) -> Result<Self, CodecError> {
        Ok(Self {
            header,
            data: codec::encode(payload)?,
        })
    }

    /// Decodes the inner payload as `T`. The caller picks `T` by matching on
    /// `self.header` first.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::decode(&self.data)
    }

    /// Encodes the whole envelope for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// Decodes an envelope received off the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `GetStatus` carries no fields; the sender's address is implicit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatusPayload {}

/// A peer's self-reported chain status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    /// Human-readable node identifier, for log correlation.
    pub id: String,
    /// The peer's current tip height.
    pub current_height: u32,
}

/// Request for a range of blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    /// First height requested.
    pub from: u32,
    /// Last height requested; `0` means "as many as you can, up to the
    /// per-request cap".
    pub to: u32,
}

/// Reply to [`GetBlocksPayload`]: each entry is one codec-encoded block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksPayload {
    /// Encoded blocks in ascending height order. May be empty.
    pub blocks: Vec<Vec<u8>>,
}
