//! # Mempool
//!
//! The pool of admitted, not-yet-sealed transactions, keyed by transaction
//! hash. Admission stamps a `first_seen` time; [`Mempool::pending`] returns a
//! snapshot ordered oldest-seen first, which is the order the validator
//! seals them in.
//!
//! ## Capacity
//!
//! The pool is bounded. When full, new transactions are rejected; a pending
//! transaction is never evicted to make room, because an entry here may be
//! the only copy in the network that has not yet been sealed.
//!
//! One mutex guards the map; every operation is O(1) or an O(n) snapshot
//! copy, and the lock is never held across I/O.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::transaction::Transaction;
use crate::types::Hash;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The pool rejected an admission.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("mempool is full ({capacity} transactions)")]
    Full { capacity: usize },
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A pooled transaction plus its admission time.
#[derive(Clone)]
struct PoolEntry {
    transaction: Transaction,
    first_seen: i64,
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// Bounded, hash-deduplicated pool of pending transactions.
pub struct Mempool {
    inner: Mutex<HashMap<Hash, PoolEntry>>,
    capacity: usize,
}

impl Mempool {
    /// Creates a pool holding at most `capacity` transactions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns `true` if a transaction with this hash is pending.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().contains_key(hash)
    }

    /// Admits a transaction.
    ///
    /// Idempotent on duplicate hash: re-adding a pooled transaction is a
    /// silent no-op that keeps the original `first_seen`. Fails only when
    /// the pool is at capacity.
    pub fn add(&self, transaction: Transaction) -> Result<(), MempoolError> {
        let hash = transaction.hash();
        let mut pool = self.inner.lock();

        if pool.contains_key(&hash) {
            return Ok(());
        }
        if pool.len() >= self.capacity {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }

        pool.insert(
            hash,
            PoolEntry {
                transaction,
                first_seen: unix_nanos(),
            },
        );
        Ok(())
    }

    /// Snapshot of pending transactions, ordered oldest-seen to newest-seen.
    ///
    /// The tie-break on hash makes the order total, so concurrent additions
    /// can reorder the tail but never scramble settled entries.
    pub fn pending(&self) -> Vec<Transaction> {
        let pool = self.inner.lock();
        let mut entries: Vec<(&Hash, &PoolEntry)> = pool.iter().collect();
        entries.sort_by(|(ah, a), (bh, b)| {
            a.first_seen.cmp(&b.first_seen).then_with(|| ah.cmp(bh))
        });
        entries
            .into_iter()
            .map(|(_, entry)| entry.transaction.clone())
            .collect()
    }

    /// Number of pending transactions.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Empties the pool. Called by the validator after sealing a block.
    pub fn clear_pending(&self) {
        self.inner.lock().clear();
    }

    /// Removes the given transactions (by hash). Called when a block arrives
    /// from the network so sealed transactions stop being pending here.
    /// Hashes not in the pool are ignored.
    pub fn flush(&self, transactions: &[Transaction]) {
        let mut pool = self.inner.lock();
        for tx in transactions {
            pool.remove(&tx.hash());
        }
    }
}

/// Current time as nanoseconds since the Unix epoch.
fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_nanos() as i64
}
