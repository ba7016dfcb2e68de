//! Persistence and chain state.
//!
//! - [`db`] — the flat key/value [`Storage`] contract and its sled
//!   implementation.
//! - [`state`] — account records and the deterministic state transition.
//! - [`block`] — headers, blocks, signing and structural verification.
//! - [`chain`] — the in-memory header chain, validation rules and range
//!   reads.

pub mod block;
pub mod chain;
pub mod db;
pub mod state;

pub use block::{data_hash, Block, BlockError, Header};
pub use chain::{Chain, ChainError};
pub use db::{SledStorage, Storage, StorageError};
pub use state::{AccountState, State, StateError};
