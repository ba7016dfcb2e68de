//! # Protocol Configuration & Constants
//!
//! Every magic number in QUARTZ lives here. If you are hardcoding a constant
//! somewhere else, you are doing it wrong and you owe the team coffee.
//!
//! These values define the behaviour of a deployment. All peers in a network
//! must agree on the consensus-relevant ones (`HEADER_VERSION`,
//! `MAX_BLOCKS_PER_REQUEST`, the codec); the rest are local tuning.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version stamped into every block header. Bump on breaking chain changes.
pub const HEADER_VERSION: u32 = 1;

/// Crate-level protocol version string, for logs and the `version` subcommand.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Default block production cadence. The validator seals whatever is pending
/// every `BLOCK_TIME`, including nothing at all: empty blocks are valid and
/// keep the height advancing for late joiners to observe.
pub const BLOCK_TIME: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Upper bound on blocks served per `GetBlocks` request. A follower that is
/// further behind than this issues follow-up requests until a short batch
/// arrives. Keeps any single reply bounded in memory on both sides.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// Default capacity of the pending transaction pool. When full, new
/// transactions are rejected; pending ones are never evicted, because a
/// dropped pending transaction may exist nowhere else in the network.
pub const DEFAULT_MEMPOOL_CAPACITY: usize = 1_000;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Capacity of the single inbound RPC channel shared by all peer read loops.
pub const RPC_CHANNEL_CAPACITY: usize = 1_024;

/// Capacity of the peer-event channel. Events are sent non-blocking and
/// dropped (with a log line) when the channel is full: liveness of the
/// read path wins over completeness of notifications.
pub const PEER_EVENT_CAPACITY: usize = 32;

/// Capacity of the block/transaction broadcast channels feeding the
/// broadcast worker.
pub const BROADCAST_CHANNEL_CAPACITY: usize = 16;

/// Maximum accepted wire frame. A length prefix beyond this tears down the
/// connection instead of allocating attacker-controlled amounts of memory.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Default Ports
// ---------------------------------------------------------------------------

/// Default P2P listen port.
pub const DEFAULT_P2P_PORT: u16 = 7340;

/// Default JSON-RPC HTTP port.
pub const DEFAULT_RPC_PORT: u16 = 7341;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 7342;
