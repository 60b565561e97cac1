use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Creates and tracks transactions. The registry is also the deadlock
/// detector's lookup path from a txn id to the transaction to abort.
pub struct TransactionManager {
    next_txn_id: AtomicI32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicI32::new(0),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, txn.clone());
        log::trace!("txn {txn_id} began ({isolation_level:?})");
        txn
    }

    /// Commit: release every held lock and retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.lock_manager.unlock_all(txn);
        self.active_transactions.lock().remove(&txn.id());
        log::trace!("txn {} committed", txn.id());
    }

    /// Abort: drain the write set (the executors' undo hook), release every
    /// held lock and retire the transaction.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        let undo = txn.take_write_set();
        if !undo.is_empty() {
            log::debug!("txn {} rolling back {} writes", txn.id(), undo.len());
        }
        self.lock_manager.unlock_all(txn);
        self.active_transactions.lock().remove(&txn.id());
        log::trace!("txn {} aborted", txn.id());
    }

    /// Look up an active transaction by id.
    pub fn transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}
