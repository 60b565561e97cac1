use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a database instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path of the database file.
    pub path: PathBuf,
    /// Buffer pool size in number of frames.
    pub pool_size: usize,
    /// K for the LRU-K replacement policy.
    pub replacer_k: usize,
    /// How often the deadlock detector wakes up.
    pub deadlock_interval: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./crab.db"),
            pool_size: 64,
            replacer_k: 2,
            deadlock_interval: Duration::from_millis(50),
        }
    }
}
