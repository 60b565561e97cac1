use std::sync::Arc;

use crate::common::config::DbConfig;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::DiskManager;
use crate::transaction::concurrency::{LockManager, TransactionManager};

/// One database instance: the storage and concurrency singletons wired
/// together. Executors receive these through an explicit context rather
/// than through globals; dropping the instance stops the deadlock
/// detector.
pub struct Database {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    txn_manager: Arc<TransactionManager>,
}

impl Database {
    pub fn open(config: &DbConfig) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(&config.path)?);
        let buffer_pool = Arc::new(BufferPoolManager::with_disk_manager(
            config.pool_size,
            config.replacer_k,
            disk_manager,
        )?);
        let lock_manager = Arc::new(LockManager::new(config.deadlock_interval));
        let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
        lock_manager.start_cycle_detection(txn_manager.clone());

        Ok(Self {
            buffer_pool,
            lock_manager,
            txn_manager,
        })
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// Flush everything the pool still holds; called before shutdown.
    pub fn flush(&self) -> Result<(), BufferPoolError> {
        self.buffer_pool.flush_all_pages()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.lock_manager.stop_cycle_detection();
    }
}
