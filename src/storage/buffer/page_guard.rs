use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped handle over a pinned page. Holds the pin only; data access takes
/// a transient shared latch. Dropping the guard unpins the page with the
/// dirty flag accumulated so far.
///
/// Guards are move-only. Assigning over a guard releases the replaced
/// page, which is exactly the hand-over contract the tree code relies on
/// while crabbing.
pub struct BasicPageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared access to the page bytes for the duration of the returned
    /// borrow.
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Mark the page dirty so the eventual unpin records the modification.
    pub fn set_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Take the shared page latch, turning this guard into a read guard.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.page.read_arc();
        ReadPageGuard { latch, guard: self }
    }

    /// Take the exclusive page latch, turning this guard into a write guard.
    pub fn upgrade_write(self) -> WritePageGuard {
        let latch = self.page.write_arc();
        WritePageGuard { latch, guard: self }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Guard owning a pin plus the shared page latch.
///
/// Field order matters: the latch drops before the inner guard, so the
/// page is unlatched before it is unpinned.
pub struct ReadPageGuard {
    latch: ArcRwLockReadGuard<RawRwLock, Page>,
    guard: BasicPageGuard,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }
}

impl std::ops::Deref for ReadPageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.latch
    }
}

/// Guard owning a pin plus the exclusive page latch. `as_mut` hands out
/// the bytes and records that the page is now dirty.
pub struct WritePageGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, Page>,
    guard: BasicPageGuard,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn as_mut(&mut self) -> &mut Page {
        self.guard.is_dirty = true;
        &mut self.latch
    }
}

impl std::ops::Deref for WritePageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.latch
    }
}

impl BufferPoolManager {
    /// Fetch a page wrapped in a pin-only guard.
    pub fn fetch_page_basic(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<BasicPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(BasicPageGuard {
            bpm: Arc::clone(self),
            page,
            page_id,
            is_dirty: false,
        })
    }

    /// Fetch a page and take its shared latch.
    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<ReadPageGuard, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetch a page and take its exclusive latch.
    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<WritePageGuard, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Allocate a new page wrapped in a pin-only guard.
    pub fn new_page_guarded(
        self: &Arc<Self>,
    ) -> Result<(BasicPageGuard, PageId), BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok((
            BasicPageGuard {
                bpm: Arc::clone(self),
                page,
                page_id,
                is_dirty: false,
            },
            page_id,
        ))
    }

    /// Allocate a new page and take its exclusive latch. Freshly allocated
    /// pages are uncontended, so this never blocks.
    pub fn new_page_write(
        self: &Arc<Self>,
    ) -> Result<(WritePageGuard, PageId), BufferPoolError> {
        let (guard, page_id) = self.new_page_guarded()?;
        Ok((guard.upgrade_write(), page_id))
    }
}
