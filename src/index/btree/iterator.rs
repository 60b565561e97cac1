use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{self, HeaderPage, InternalPage, LeafPage};
use crate::index::btree::tree::BPlusTree;
use crate::storage::buffer::{BasicPageGuard, BufferPoolManager};

/// Ascending scan over the leaf chain.
///
/// The iterator pins (but does not latch) the current leaf and remembers a
/// slot index; stepping past the last slot hops to `next_page_id`, dropping
/// the old pin before taking the next one. Concurrent structural changes to
/// the current leaf invalidate the scan; callers wanting a stable view hold
/// locks above this layer.
pub struct BTreeIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    guard: Option<BasicPageGuard>,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: IndexKey> BTreeIterator<K> {
    fn new(bpm: Arc<BufferPoolManager>, guard: Option<BasicPageGuard>, index: usize) -> Self {
        Self {
            bpm,
            guard,
            index,
            _marker: PhantomData,
        }
    }

    /// True once the scan has run off the end of the last leaf.
    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }
}

impl<K: IndexKey> Iterator for BTreeIterator<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.guard.as_ref()?;

            let (item, next_page_id) = {
                let page = guard.page();
                let leaf = LeafPage::<_, K>::new(&page.data[..]);
                if self.index < leaf.size() {
                    (Some((leaf.key_at(self.index), leaf.rid_at(self.index))), INVALID_PAGE_ID)
                } else {
                    (None, leaf.next_page_id())
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(Ok(item));
            }

            // Exhausted this leaf: drop its pin, then chase the chain.
            self.guard = None;
            if next_page_id == INVALID_PAGE_ID {
                return None;
            }
            match self.bpm.fetch_page_basic(next_page_id) {
                Ok(next_guard) => {
                    self.guard = Some(next_guard);
                    self.index = 0;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        self.leaf_scan(None)
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        self.leaf_scan(Some(key))
    }

    fn leaf_scan(&self, start: Option<&K>) -> Result<BTreeIterator<K>, BTreeError> {
        let bpm = Arc::clone(self.bpm());

        let header_guard = bpm.fetch_page_basic(self.header_page_id())?;
        let root_id = {
            let page = header_guard.page();
            HeaderPage::new(&page.data[..]).root_page_id()
        };
        drop(header_guard);

        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::new(bpm, None, 0));
        }

        let mut guard = bpm.fetch_page_basic(root_id)?;
        loop {
            let child_id = {
                let page = guard.page();
                if page::is_leaf_page(&page.data) {
                    break;
                }
                let internal = InternalPage::<_, K>::new(&page.data[..]);
                match start {
                    Some(key) => internal.child_at(internal.key_index(key)),
                    None => internal.child_at(0),
                }
            };
            guard = bpm.fetch_page_basic(child_id)?;
        }

        let index = match start {
            Some(key) => {
                let page = guard.page();
                LeafPage::<_, K>::new(&page.data[..]).key_index(key)
            }
            None => 0,
        };

        Ok(BTreeIterator::new(bpm, Some(guard), index))
    }
}
