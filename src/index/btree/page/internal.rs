use std::marker::PhantomData;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    INTERNAL_PAGE_TYPE, MAX_SIZE_OFFSET, PAGE_TYPE_OFFSET, SIZE_OFFSET,
};

const INTERNAL_HEADER_SIZE: usize = 12;
const CHILD_SIZE: usize = 4;

/// View over an internal page.
///
/// Layout (little-endian): `[page_type:4][size:4][max_size:4]` followed by
/// `size` packed `(key, child_page_id)` entries. `size` counts children;
/// slot 0's key region is present but unused (a sentinel), keys from slot 1
/// onward are sorted. The subtree under child `i` holds keys `k` with
/// `key[i] <= k < key[i+1]` (unbounded at the ends).
pub struct InternalPage<B, K> {
    data: B,
    _marker: PhantomData<K>,
}

impl<B: AsRef<[u8]>, K: IndexKey> InternalPage<B, K> {
    pub fn new(data: B) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn entry_size() -> usize {
        K::ENCODED_SIZE + CHILD_SIZE
    }

    fn entry_offset(index: usize) -> usize {
        INTERNAL_HEADER_SIZE + index * Self::entry_size()
    }

    pub fn size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize
    }

    pub fn max_size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize
    }

    /// Minimum child count for a non-root internal page: ceil(max_size / 2).
    pub fn min_size(&self) -> usize {
        (self.max_size() + 1) / 2
    }

    pub fn key_at(&self, index: usize) -> K {
        let off = Self::entry_offset(index);
        K::decode_from(&self.data.as_ref()[off..off + K::ENCODED_SIZE])
    }

    pub fn child_at(&self, index: usize) -> PageId {
        let off = Self::entry_offset(index) + K::ENCODED_SIZE;
        LittleEndian::read_i32(&self.data.as_ref()[off..off + 4])
    }

    /// Index of the child to descend for `key`: upper_bound over the sorted
    /// keys in slots [1, size), minus one.
    pub fn key_index(&self, key: &K) -> usize {
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) > *key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo - 1
    }

    /// Linear search for a child pointer's slot.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    /// Decode every entry (slot 0's key included, sentinel as it is).
    pub fn entries(&self) -> Vec<(K, PageId)> {
        (0..self.size()).map(|i| (self.key_at(i), self.child_at(i))).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> InternalPage<B, K> {
    pub fn init(&mut self, max_size: usize) {
        let data = self.data.as_mut();
        LittleEndian::write_u32(
            &mut data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4],
            INTERNAL_PAGE_TYPE,
        );
        LittleEndian::write_u32(&mut data[SIZE_OFFSET..SIZE_OFFSET + 4], 0);
        LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size as u32);
    }

    fn set_size(&mut self, size: usize) {
        LittleEndian::write_u32(&mut self.data.as_mut()[SIZE_OFFSET..SIZE_OFFSET + 4], size as u32);
    }

    pub fn set_key_at(&mut self, index: usize, key: K) {
        let off = Self::entry_offset(index);
        key.encode_into(&mut self.data.as_mut()[off..off + K::ENCODED_SIZE]);
    }

    pub fn set_entry(&mut self, index: usize, key: K, child: PageId) {
        let off = Self::entry_offset(index);
        let data = self.data.as_mut();
        key.encode_into(&mut data[off..off + K::ENCODED_SIZE]);
        LittleEndian::write_i32(&mut data[off + K::ENCODED_SIZE..off + K::ENCODED_SIZE + 4], child);
    }

    /// Seed a brand-new root after its old root split: slot 0 carries the
    /// left child (key region is a sentinel), slot 1 the separator and the
    /// right child.
    pub fn create_new_root(&mut self, key: K, left: PageId, right: PageId) {
        self.set_entry(0, key, left);
        self.set_entry(1, key, right);
        self.set_size(2);
    }

    /// Insert a separator/child pair at its sorted position among slots
    /// [1, size). The caller guarantees the page is not full.
    pub fn insert(&mut self, key: K, child: PageId) {
        let size = self.size();
        let (mut lo, mut hi) = (1, size);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) > key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let index = lo;

        let entry = Self::entry_size();
        self.data.as_mut().copy_within(
            Self::entry_offset(index)..Self::entry_offset(size),
            Self::entry_offset(index) + entry,
        );
        self.set_entry(index, key, child);
        self.set_size(size + 1);
    }

    /// Remove the entry at `index`, shifting the tail left.
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        self.data.as_mut().copy_within(
            Self::entry_offset(index + 1)..Self::entry_offset(size),
            Self::entry_offset(index),
        );
        self.set_size(size - 1);
    }

    /// Overwrite the whole entry array; used by the overflow split path.
    pub fn write_entries(&mut self, entries: &[(K, PageId)]) {
        for (i, &(key, child)) in entries.iter().enumerate() {
            self.set_entry(i, key, child);
        }
        self.set_size(entries.len());
    }

    /// Append every entry of this page to `recipient` (its left neighbor),
    /// first demoting the parent separator into this page's slot-0 key so
    /// the routing invariant survives the move.
    pub fn move_all_into<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<B2, K>,
        middle_key: K,
    ) {
        self.set_key_at(0, middle_key);
        let start = recipient.size();
        for i in 0..self.size() {
            recipient.set_entry(start + i, self.key_at(i), self.child_at(i));
        }
        recipient.set_size(start + self.size());
        self.set_size(0);
    }

    /// Rotate this page's first entry onto the end of `recipient` (its left
    /// neighbor); the moved entry takes the parent separator as its key.
    /// Returns this page's new slot-0 key, the separator to write back into
    /// the parent.
    pub fn move_front_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<B2, K>,
        parent_key: K,
    ) -> K {
        recipient.set_entry(recipient.size(), parent_key, self.child_at(0));
        recipient.set_size(recipient.size() + 1);

        let size = self.size();
        self.data.as_mut().copy_within(
            Self::entry_offset(1)..Self::entry_offset(size),
            Self::entry_offset(0),
        );
        self.set_size(size - 1);
        self.key_at(0)
    }

    /// Rotate this page's last entry onto the front of `recipient` (its
    /// right neighbor); the displaced slot-0 entry takes the parent
    /// separator as its key. Returns the recipient's new slot-0 key.
    pub fn move_end_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<B2, K>,
        parent_key: K,
    ) -> K {
        let r_size = recipient.size();
        recipient.data.as_mut().copy_within(
            InternalPage::<B2, K>::entry_offset(0)..InternalPage::<B2, K>::entry_offset(r_size),
            InternalPage::<B2, K>::entry_offset(1),
        );
        let last = self.size() - 1;
        recipient.set_entry(0, self.key_at(last), self.child_at(last));
        recipient.set_key_at(1, parent_key);
        recipient.set_size(r_size + 1);
        self.set_size(last);
        recipient.key_at(0)
    }
}
