// Export public modules
pub mod common;
pub mod database;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::DbConfig;
pub use database::Database;
pub use index::btree::{BPlusTree, BTreeError, BTreeIterator, FixedKey, IndexKey};
pub use storage::buffer::{
    BasicPageGuard, BufferPoolError, BufferPoolManager, LruKReplacer, ReadPageGuard,
    WritePageGuard,
};
pub use storage::disk::DiskManager;
pub use transaction::{
    AbortReason, IsolationLevel, LockManager, LockMode, Transaction, TransactionAbort,
    TransactionManager, TransactionState,
};
