use std::collections::{HashMap, VecDeque};

use crate::common::types::FrameId;

/// Per-frame access bookkeeping for the LRU-K policy.
struct LruKNode {
    /// Most recent access timestamps, newest first, at most k entries.
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new(k: usize, timestamp: u64) -> Self {
        let mut history = VecDeque::with_capacity(k);
        history.push_front(timestamp);
        Self {
            history,
            evictable: false,
        }
    }

    fn record(&mut self, k: usize, timestamp: u64) {
        self.history.push_front(timestamp);
        self.history.truncate(k);
    }

    /// Timestamp of the k-th most recent access, or None if the frame has
    /// been accessed fewer than k times.
    fn back_k(&self, k: usize) -> Option<u64> {
        if self.history.len() == k {
            self.history.back().copied()
        } else {
            None
        }
    }
}

/// LRU-K replacement policy.
///
/// Frames with fewer than k recorded accesses live in the history pool,
/// ordered FIFO by first access; their backward k-distance is infinite, so
/// they are preferred victims. Frames with at least k accesses live in the
/// cache pool, ordered ascending by the timestamp of their k-th most recent
/// access. Eviction picks the first evictable frame of the history pool,
/// falling back to the cache pool.
///
/// The replacer carries no lock of its own; the buffer pool serializes all
/// calls under its pool latch.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    current_timestamp: u64,
    node_store: HashMap<FrameId, LruKNode>,
    history_pool: VecDeque<FrameId>,
    /// (frame_id, k-th most recent access), kept sorted ascending by timestamp.
    cache_pool: Vec<(FrameId, u64)>,
    evictable_count: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            k,
            replacer_size: num_frames,
            current_timestamp: 0,
            node_store: HashMap::new(),
            history_pool: VecDeque::new(),
            cache_pool: Vec::new(),
            evictable_count: 0,
        }
    }

    /// Stamp an access for the given frame, promoting it from the history
    /// pool to the cache pool on its k-th access.
    pub fn record_access(&mut self, frame_id: FrameId) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {} out of range for replacer of size {}",
            frame_id,
            self.replacer_size
        );
        self.current_timestamp += 1;
        let now = self.current_timestamp;

        let k = self.k;
        match self.node_store.get_mut(&frame_id) {
            None => {
                self.node_store.insert(frame_id, LruKNode::new(k, now));
                self.history_pool.push_back(frame_id);
            }
            Some(node) => {
                let was_cached = node.back_k(k).is_some();
                node.record(k, now);
                let back_k = node.back_k(k);

                if let Some(ts) = back_k {
                    if was_cached {
                        // Reposition within the cache pool.
                        if let Some(pos) =
                            self.cache_pool.iter().position(|&(f, _)| f == frame_id)
                        {
                            self.cache_pool.remove(pos);
                        }
                    } else {
                        // k-th access: promote out of the history pool.
                        if let Some(pos) =
                            self.history_pool.iter().position(|&f| f == frame_id)
                        {
                            self.history_pool.remove(pos);
                        }
                    }
                    let insert_at = self
                        .cache_pool
                        .partition_point(|&(_, existing)| existing <= ts);
                    self.cache_pool.insert(insert_at, (frame_id, ts));
                }
                // Fewer than k accesses: stays put in the history pool.
            }
        }
    }

    /// Toggle eviction eligibility. Unknown frames are ignored.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {} out of range for replacer of size {}",
            frame_id,
            self.replacer_size
        );
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.evictable && !evictable {
            node.evictable = false;
            self.evictable_count -= 1;
        } else if !node.evictable && evictable {
            node.evictable = true;
            self.evictable_count += 1;
        }
    }

    /// Pick the evictable frame with maximum backward k-distance and drop
    /// its bookkeeping. Returns None if nothing is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.evictable_count == 0 {
            return None;
        }

        if let Some(pos) = self
            .history_pool
            .iter()
            .position(|f| self.node_store[f].evictable)
        {
            let frame_id = self.history_pool.remove(pos).unwrap();
            self.node_store.remove(&frame_id);
            self.evictable_count -= 1;
            log::trace!("lru-k evicting frame {frame_id} from history pool");
            return Some(frame_id);
        }

        if let Some(pos) = self
            .cache_pool
            .iter()
            .position(|(f, _)| self.node_store[f].evictable)
        {
            let (frame_id, _) = self.cache_pool.remove(pos);
            self.node_store.remove(&frame_id);
            self.evictable_count -= 1;
            log::trace!("lru-k evicting frame {frame_id} from cache pool");
            return Some(frame_id);
        }

        None
    }

    /// Forcibly drop a known frame's bookkeeping. The frame must be
    /// evictable.
    pub fn remove(&mut self, frame_id: FrameId) {
        let Some(node) = self.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.evictable,
            "remove called on non-evictable frame {frame_id}"
        );
        if let Some(pos) = self.history_pool.iter().position(|&f| f == frame_id) {
            self.history_pool.remove(pos);
        }
        if let Some(pos) = self.cache_pool.iter().position(|&(f, _)| f == frame_id) {
            self.cache_pool.remove(pos);
        }
        self.node_store.remove(&frame_id);
        self.evictable_count -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_count
    }
}
