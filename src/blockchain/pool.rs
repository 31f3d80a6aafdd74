use log::debug;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transaction::Transaction;

/// Pending transactions awaiting inclusion in the next block
///
/// Cloning shares the underlying buffer. Every operation is a single critical
/// section, so a transaction submitted while the pool is being drained lands
/// either in the drained batch or in the fresh pool, never both.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    pending: Arc<Mutex<Vec<Transaction>>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    // Pushes and swaps cannot leave the Vec half-updated, so a poisoned lock
    // still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a transaction in arrival order and returns the new pool size
    pub fn add(&self, transaction: Transaction) -> usize {
        let mut pending = self.lock();
        pending.push(transaction);
        pending.len()
    }

    /// Moves every pending transaction out, leaving the pool empty
    pub fn drain(&self) -> Vec<Transaction> {
        let drained = std::mem::take(&mut *self.lock());
        debug!("Drained {} transactions from pool", drained.len());
        drained
    }

    /// Puts a drained batch back ahead of anything submitted since the drain
    pub fn restore(&self, mut batch: Vec<Transaction>) {
        if batch.is_empty() {
            return;
        }

        let mut pending = self.lock();
        debug!(
            "Restoring {} transactions to pool ({} arrived meanwhile)",
            batch.len(),
            pending.len()
        );
        batch.append(&mut pending);
        *pending = batch;
    }

    /// Snapshot of the pending transactions
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.lock().clone()
    }
}
