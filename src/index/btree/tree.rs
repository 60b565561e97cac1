mod deletion;
mod insertion;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{self, HeaderPage, InternalPage, LeafPage};
use crate::storage::buffer::{BufferPoolManager, WritePageGuard};

/// Concurrent on-disk B+Tree index mapping fixed-width keys to record ids.
///
/// All state lives in buffer-pool pages reached from the header page; the
/// struct itself only carries the tree parameters, so it is freely shared
/// across threads. Readers couple read latches parent-to-child; writers
/// crab a write-latched path that is trimmed as soon as a child is safe.
pub struct BPlusTree<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<K>,
}

/// Which structural operation is crabbing down, deciding when an ancestor
/// latch can be released early.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CrabMode {
    Insert,
    Delete,
}

/// Latches held during a structure-modifying descent: the header guard
/// (dropped once some descendant is safe) and the retained write path,
/// leaf-most guard at the back.
pub(crate) struct Context {
    pub(crate) header: Option<WritePageGuard>,
    pub(crate) root_page_id: PageId,
    pub(crate) write_set: VecDeque<WritePageGuard>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Create a tree over an externally registered header page. The header
    /// is (re)initialized to an empty tree.
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        header_page_id: PageId,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf pages need at least 3 slots");
        assert!(internal_max_size >= 3, "internal pages need at least 3 slots");

        let mut header_guard = bpm.fetch_page_write(header_page_id)?;
        HeaderPage::new(&mut header_guard.as_mut().data[..]).set_root_page_id(INVALID_PAGE_ID);
        drop(header_guard);

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderPage::new(&guard.data[..]).root_page_id())
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub(crate) fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub(crate) fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub(crate) fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    /// Point lookup: crab down with read latches, holding at most a parent
    /// and child pair at any moment.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = HeaderPage::new(&header_guard.data[..]).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header_guard);

        loop {
            if page::is_leaf_page(&guard.data) {
                return Ok(LeafPage::<_, K>::new(&guard.data[..]).lookup(key));
            }
            let child_id = {
                let internal = InternalPage::<_, K>::new(&guard.data[..]);
                internal.child_at(internal.key_index(key))
            };
            // Latch the child before the parent guard is released.
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Descend to the leaf for `key` with write latches, building the crab
    /// context. A child that cannot split (insert) or underflow (delete)
    /// makes every ancestor latch, the header's included, releasable.
    pub(crate) fn crab_to_leaf(
        &self,
        header_guard: WritePageGuard,
        root_id: PageId,
        key: &K,
        mode: CrabMode,
    ) -> Result<Context, BTreeError> {
        let mut ctx = Context {
            header: Some(header_guard),
            root_page_id: root_id,
            write_set: VecDeque::new(),
        };

        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            if page::is_leaf_page(&guard.data) {
                ctx.write_set.push_back(guard);
                return Ok(ctx);
            }

            let child_id = {
                let internal = InternalPage::<_, K>::new(&guard.data[..]);
                internal.child_at(internal.key_index(key))
            };
            ctx.write_set.push_back(guard);

            let child_guard = self.bpm.fetch_page_write(child_id)?;
            if Self::is_safe(&child_guard.data, mode) {
                ctx.write_set.clear();
                ctx.header = None;
            }
            guard = child_guard;
        }
    }

    /// Whether a page can absorb the operation without propagating a
    /// structural change to its parent.
    fn is_safe(data: &[u8], mode: CrabMode) -> bool {
        if page::is_leaf_page(data) {
            let leaf = LeafPage::<_, K>::new(data);
            match mode {
                CrabMode::Insert => leaf.size() < leaf.max_size() - 1,
                CrabMode::Delete => leaf.size() > leaf.min_size(),
            }
        } else {
            let internal = InternalPage::<_, K>::new(data);
            match mode {
                CrabMode::Insert => internal.size() < internal.max_size(),
                CrabMode::Delete => internal.size() > internal.min_size(),
            }
        }
    }
}
