//! # Catch-up Decisions
//!
//! The sync protocol itself is four messages (`GetStatus` → `Status` →
//! `GetBlocks` → `Blocks`) handled in [`super::node`]. What lives here is
//! the arithmetic those handlers share: when to start pulling, how many
//! blocks a request is entitled to, and whether a received batch implies
//! the peer has more.
//!
//! The server side is stateless (every `GetBlocks` is answered
//! independently from the chain), so these three functions are the entire
//! protocol state machine.

use crate::config::MAX_BLOCKS_PER_REQUEST;
use crate::network::message::GetBlocksPayload;

/// Decides whether to start pulling from a peer that reported
/// `peer_height`, given our own `local_height`.
///
/// Returns the first request of the catch-up, or `None` when the peer has
/// nothing we lack. `to = 0` asks for as many blocks as the peer will
/// serve, up to the per-request cap.
pub fn catch_up_request(local_height: u32, peer_height: u32) -> Option<GetBlocksPayload> {
    if peer_height > local_height {
        Some(GetBlocksPayload {
            from: local_height + 1,
            to: 0,
        })
    } else {
        None
    }
}

/// Number of blocks a `GetBlocks { from, to }` request is entitled to.
///
/// `to = 0` means "up to the cap"; an explicit window is honored but still
/// clamped to the cap. An inverted window is entitled to nothing.
pub fn batch_size(from: u32, to: u32) -> usize {
    if to == 0 {
        return MAX_BLOCKS_PER_REQUEST;
    }
    if to < from {
        return 0;
    }
    ((to - from + 1) as usize).min(MAX_BLOCKS_PER_REQUEST)
}

/// A batch of exactly the cap strongly suggests the peer was clipped and
/// has more; anything shorter means we have drained it.
pub fn wants_more_after(batch_len: usize) -> bool {
    batch_len == MAX_BLOCKS_PER_REQUEST
}
