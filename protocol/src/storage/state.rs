//! # Account State & the State Transition
//!
//! `State` is a thin facade over [`Storage`]: accounts live under the `'a'`
//! key prefix, encoded with the deployment codec. There is no account
//! creation step: a missing account reads back as the zero account for its
//! address, so every address "exists" from the start with balance 0 and
//! nonce 0.
//!
//! ## Transfer transition
//!
//! For one transaction, with `sender = tx.from.address()`:
//!
//! 1. Load sender and recipient (missing ⇒ zero account).
//! 2. Reject unless `tx.nonce == sender.nonce` (strict equality).
//! 3. Reject unless `sender.balance >= tx.value`.
//! 4. `sender.nonce += 1; sender.balance -= value; recipient.balance += value`.
//! 5. Persist both accounts.
//!
//! ## Whole-block atomicity
//!
//! [`State::apply_block`] stages every write in memory and persists only
//! after the last transaction has succeeded. A failure at transaction *i*
//! therefore aborts the block with storage untouched; the caller discards
//! the block and no rollback is ever needed on disk.
//!
//! Self-transfers fall out of the staging order for free: the sender's
//! debit-plus-nonce-bump is staged first, the recipient credit then reads
//! that staged entry, leaving the balance unchanged and the nonce advanced.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec;
use crate::storage::db::{Storage, StorageError};
use crate::transaction::Transaction;
use crate::types::Address;

const ACCOUNT_PREFIX: u8 = b'a';

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + Address::LENGTH);
    key.push(ACCOUNT_PREFIX);
    key.extend_from_slice(address.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// AccountState
// ---------------------------------------------------------------------------

/// The persisted state of a single account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// The account's address.
    pub address: Address,
    /// Current balance in units.
    pub balance: u64,
    /// Next expected transaction nonce.
    pub nonce: u64,
}

impl AccountState {
    /// The implicit state of an account that has never been written.
    pub fn zero(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            nonce: 0,
        }
    }

    /// A fresh account holding `balance` units (genesis alloc).
    pub fn with_balance(address: Address, balance: u64) -> Self {
        Self {
            address,
            balance,
            nonce: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A transaction was rejected by the state transition, or storage failed.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid nonce: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("transaction has no sender")]
    MissingSender,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Account state backed directly by [`Storage`].
///
/// Reads and writes are point operations; no iteration anywhere.
#[derive(Clone)]
pub struct State {
    store: Arc<dyn Storage>,
}

impl State {
    /// Wraps a storage handle.
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Loads an account. A missing record is the zero account, not an error.
    pub fn get(&self, address: &Address) -> Result<AccountState, StateError> {
        match self.store.get(&account_key(address)) {
            Ok(bytes) => Ok(codec::decode(&bytes).map_err(StorageError::from)?),
            Err(StorageError::NotFound) => Ok(AccountState::zero(*address)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists an account record.
    pub fn put(&self, account: &AccountState) -> Result<(), StateError> {
        let bytes = codec::encode(account).map_err(StorageError::from)?;
        self.store.put(&account_key(&account.address), &bytes)?;
        Ok(())
    }

    /// Applies every transaction of a block in order, all-or-nothing.
    ///
    /// Writes are staged in memory; the first rejection aborts with storage
    /// untouched. Only after every transaction has been applied are the
    /// staged accounts persisted.
    pub fn apply_block(&self, transactions: &[Transaction]) -> Result<(), StateError> {
        let mut staged: HashMap<Address, AccountState> = HashMap::new();

        for tx in transactions {
            self.apply_staged(&mut staged, tx)?;
        }

        for account in staged.values() {
            self.put(account)?;
        }
        Ok(())
    }

    /// Applies one transaction against the staged overlay.
    fn apply_staged(
        &self,
        staged: &mut HashMap<Address, AccountState>,
        tx: &Transaction,
    ) -> Result<(), StateError> {
        let sender_addr = tx.sender().ok_or(StateError::MissingSender)?;

        let mut sender = self.load_staged(staged, &sender_addr)?;
        if tx.nonce != sender.nonce {
            return Err(StateError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        if sender.balance < tx.value {
            return Err(StateError::InsufficientBalance {
                have: sender.balance,
                need: tx.value,
            });
        }

        sender.nonce += 1;
        sender.balance -= tx.value;
        staged.insert(sender_addr, sender);

        // Loaded after the sender write so a self-transfer credits the
        // already-debited entry: balance unchanged, nonce advanced.
        let mut recipient = self.load_staged(staged, &tx.to)?;
        recipient.balance += tx.value;
        staged.insert(tx.to, recipient);

        debug!(
            from = %sender_addr,
            to = %tx.to,
            value = tx.value,
            nonce = tx.nonce,
            "transaction applied"
        );
        Ok(())
    }

    /// Reads an account through the staged overlay, falling back to storage.
    fn load_staged(
        &self,
        staged: &HashMap<Address, AccountState>,
        address: &Address,
    ) -> Result<AccountState, StateError> {
        if let Some(account) = staged.get(address) {
            return Ok(account.clone());
        }
        self.get(address)
    }
}
