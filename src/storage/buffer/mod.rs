pub mod error;
pub mod lru_k;
pub mod manager;
pub mod page_guard;

pub use error::BufferPoolError;
pub use lru_k::LruKReplacer;
pub use manager::BufferPoolManager;
pub use page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
