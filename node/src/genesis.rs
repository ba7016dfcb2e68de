//! # Genesis File
//!
//! A genesis file pins the deterministic block at height 0 and the initial
//! balance allocation:
//!
//! ```json
//! {
//!   "timestamp": 0,
//!   "alloc": {
//!     "1111111111111111111111111111111111111111": { "balance": 1000 }
//!   }
//! }
//! ```
//!
//! Every peer of a network must load the same file: the genesis block it
//! describes is installed verbatim on first start, and two peers with
//! different genesis blocks can never sync.
//!
//! The alloc map is written into account state only when the database is
//! empty. Restarts skip it and reload whatever the chain has since become;
//! re-crediting the alloc on every boot would mint money.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use quartz_protocol::storage::{Block, State, StateError};
use quartz_protocol::storage::AccountState;
use quartz_protocol::types::Address;

/// One entry of the genesis balance map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocEntry {
    /// Initial balance in units.
    pub balance: u64,
}

/// The parsed genesis file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisFile {
    /// Timestamp of the genesis header (nanoseconds since epoch).
    #[serde(default)]
    pub timestamp: i64,

    /// Initial account balances, keyed by hex address.
    #[serde(default)]
    pub alloc: HashMap<Address, AllocEntry>,
}

impl GenesisFile {
    /// Reads and parses a genesis file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read genesis file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse genesis file {}", path.display()))
    }

    /// Builds the deterministic genesis block this file describes.
    pub fn block(&self) -> Block {
        Block::genesis(self.timestamp)
    }

    /// Writes every alloc entry into account state.
    ///
    /// Only call on a fresh (empty) database; see the module docs.
    pub fn apply_alloc(&self, state: &State) -> Result<(), StateError> {
        for (address, entry) in &self.alloc {
            state.put(&AccountState::with_balance(*address, entry.balance))?;
        }
        Ok(())
    }
}
