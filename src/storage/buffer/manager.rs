use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::lru_k::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Mapping state of the pool; a single latch over all of it keeps the
/// pin/eviction bookkeeping easy to reason about.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    next_page_id: PageId,
}

/// Buffer pool manager: caches disk pages in a fixed array of frames,
/// pinning residents and evicting cold pages through the LRU-K replacer.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Self::with_disk_manager(pool_size, replacer_k, disk_manager)
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Result<Self, BufferPoolError> {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            let page = Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
                next_page_id: 0,
            }),
            disk_manager,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id, place the page in a frame and pin it.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = state.next_page_id;
        state.next_page_id += 1;

        let frame = &self.frames[frame_id];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(page_id);
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            let page_ptr = {
                let mut frame_guard = frame.write();
                frame_guard.pin_count += 1;
                frame_guard.page.clone()
            };
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(page_ptr);
        }

        let frame_id = self.acquire_frame(&mut state)?;

        let mut new_page = Page::new(page_id);
        self.disk_manager.read_page(page_id, &mut new_page)?;

        let frame = &self.frames[frame_id];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = new_page;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(page_ptr)
    }

    /// Drop one pin on the page, ORing in the caller's dirty flag. A page
    /// whose pin count reaches zero becomes evictable.
    ///
    /// Returns false if the page is not resident or was already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return false;
        }
        frame_guard.pin_count -= 1;
        frame_guard.is_dirty |= is_dirty;
        let now_unpinned = frame_guard.pin_count == 0;
        drop(frame_guard);

        if now_unpinned {
            state.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page to disk regardless of its dirty bit and clear it.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Delete a page from the pool. Succeeds trivially when the page is not
    /// resident; fails when the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count > 0 {
            return false;
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push_back(frame_id);

        frame_guard.page.write().reset();
        frame_guard.is_dirty = false;
        frame_guard.pin_count = 0;
        // Page ids are allocated monotonically; the id itself is not reused.
        true
    }

    /// Find a frame for a new resident: free list first, then eviction.
    /// Eviction writes back a dirty victim before the frame is reused.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            return Err(BufferPoolError::PoolExhausted);
        };

        let frame = &self.frames[frame_id];
        let (old_page_id, dirty) = {
            let frame_guard = frame.read();
            debug_assert_eq!(frame_guard.pin_count, 0, "evicted a pinned frame");
            let page_guard = frame_guard.page.read();
            (page_guard.page_id, frame_guard.is_dirty)
        };

        if dirty {
            log::trace!("writing back dirty page {old_page_id} before evicting frame {frame_id}");
            let frame_guard = frame.read();
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }

    /// Current pin count of a resident page; None if not resident. Test and
    /// introspection hook.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(self.frames[frame_id].read().pin_count)
    }

    /// Number of frames currently eligible for eviction.
    pub fn evictable_count(&self) -> usize {
        self.state.lock().replacer.size()
    }
}
