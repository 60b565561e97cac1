use std::marker::PhantomData;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{
    LEAF_PAGE_TYPE, MAX_SIZE_OFFSET, PAGE_TYPE_OFFSET, SIZE_OFFSET,
};

const NEXT_PAGE_ID_OFFSET: usize = 12;
const LEAF_HEADER_SIZE: usize = 16;
const RID_SIZE: usize = 8;

/// View over a leaf page.
///
/// Layout (little-endian):
/// `[page_type:4][size:4][max_size:4][next_page_id:4]` followed by `size`
/// packed `(key, rid)` entries in strictly ascending key order. Leaves are
/// chained left-to-right through `next_page_id`, terminating at
/// `INVALID_PAGE_ID`.
pub struct LeafPage<B, K> {
    data: B,
    _marker: PhantomData<K>,
}

impl<B: AsRef<[u8]>, K: IndexKey> LeafPage<B, K> {
    pub fn new(data: B) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn entry_size() -> usize {
        K::ENCODED_SIZE + RID_SIZE
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_HEADER_SIZE + index * Self::entry_size()
    }

    pub fn size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize
    }

    pub fn max_size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize
    }

    /// Minimum entry count for a non-root leaf: ceil((max_size - 1) / 2).
    pub fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4])
    }

    pub fn key_at(&self, index: usize) -> K {
        let off = Self::entry_offset(index);
        K::decode_from(&self.data.as_ref()[off..off + K::ENCODED_SIZE])
    }

    pub fn rid_at(&self, index: usize) -> Rid {
        let off = Self::entry_offset(index) + K::ENCODED_SIZE;
        let data = self.data.as_ref();
        Rid {
            page_id: LittleEndian::read_i32(&data[off..off + 4]),
            slot: LittleEndian::read_u32(&data[off + 4..off + 8]),
        }
    }

    /// First index whose key is > `key`.
    fn upper_bound(&self, key: &K) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) > *key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// First index whose key is >= `key` (the scan start position).
    pub fn key_index(&self, key: &K) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid) >= *key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// Point lookup.
    pub fn lookup(&self, key: &K) -> Option<Rid> {
        let index = self.key_index(key);
        if index < self.size() && self.key_at(index) == *key {
            Some(self.rid_at(index))
        } else {
            None
        }
    }

    /// Decode every entry; test and debugging helper.
    pub fn entries(&self) -> Vec<(K, Rid)> {
        (0..self.size()).map(|i| (self.key_at(i), self.rid_at(i))).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> LeafPage<B, K> {
    /// Initialize a fresh leaf: tag, zero size, no right sibling.
    pub fn init(&mut self, max_size: usize) {
        let data = self.data.as_mut();
        LittleEndian::write_u32(&mut data[PAGE_TYPE_OFFSET..PAGE_TYPE_OFFSET + 4], LEAF_PAGE_TYPE);
        LittleEndian::write_u32(&mut data[SIZE_OFFSET..SIZE_OFFSET + 4], 0);
        LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size as u32);
        LittleEndian::write_i32(
            &mut data[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4],
            INVALID_PAGE_ID,
        );
    }

    fn set_size(&mut self, size: usize) {
        LittleEndian::write_u32(&mut self.data.as_mut()[SIZE_OFFSET..SIZE_OFFSET + 4], size as u32);
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        LittleEndian::write_i32(
            &mut self.data.as_mut()[NEXT_PAGE_ID_OFFSET..NEXT_PAGE_ID_OFFSET + 4],
            next_page_id,
        );
    }

    pub fn set_entry(&mut self, index: usize, key: K, rid: Rid) {
        let off = Self::entry_offset(index);
        let data = self.data.as_mut();
        key.encode_into(&mut data[off..off + K::ENCODED_SIZE]);
        let off = off + K::ENCODED_SIZE;
        LittleEndian::write_i32(&mut data[off..off + 4], rid.page_id);
        LittleEndian::write_u32(&mut data[off + 4..off + 8], rid.slot);
    }

    /// Insert a key/rid pair at its sorted position, rejecting duplicates.
    pub fn insert(&mut self, key: K, rid: Rid) -> bool {
        let index = self.upper_bound(&key);
        if index > 0 && self.key_at(index - 1) == key {
            return false;
        }

        let size = self.size();
        let entry = Self::entry_size();
        self.data.as_mut().copy_within(
            Self::entry_offset(index)..Self::entry_offset(size),
            Self::entry_offset(index) + entry,
        );
        self.set_entry(index, key, rid);
        self.set_size(size + 1);
        true
    }

    /// Remove the entry for `key`, returning whether it existed.
    pub fn remove(&mut self, key: &K) -> bool {
        let index = self.key_index(key);
        let size = self.size();
        if index >= size || self.key_at(index) != *key {
            return false;
        }

        self.data.as_mut().copy_within(
            Self::entry_offset(index + 1)..Self::entry_offset(size),
            Self::entry_offset(index),
        );
        self.set_size(size - 1);
        true
    }

    /// Move the upper half of this (full) leaf into the freshly initialized
    /// `recipient`, returning the separator key (the recipient's first key).
    pub fn split_into<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<B2, K>,
    ) -> K {
        let min_size = self.min_size();
        let size = self.size();
        for i in min_size..size {
            recipient.set_entry(i - min_size, self.key_at(i), self.rid_at(i));
        }
        recipient.set_size(size - min_size);
        self.set_size(min_size);
        recipient.key_at(0)
    }

    /// Append every entry of this leaf to `recipient` (its left neighbor)
    /// and hand over the sibling chain.
    pub fn move_all_into<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<B2, K>,
    ) {
        let start = recipient.size();
        for i in 0..self.size() {
            recipient.set_entry(start + i, self.key_at(i), self.rid_at(i));
        }
        recipient.set_size(start + self.size());
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Rotate this page's first entry onto the end of `recipient` (its left
    /// neighbor). Returns this page's new first key, the separator to write
    /// back into the parent.
    pub fn move_front_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<B2, K>,
    ) -> K {
        recipient.set_entry(recipient.size(), self.key_at(0), self.rid_at(0));
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
    /// right neighbor). Returns the recipient's new first key.
    pub fn move_end_to<B2: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<B2, K>,
    ) -> K {
        let r_size = recipient.size();
        recipient.data.as_mut().copy_within(
            LeafPage::<B2, K>::entry_offset(0)..LeafPage::<B2, K>::entry_offset(r_size),
            LeafPage::<B2, K>::entry_offset(1),
        );
        let last = self.size() - 1;
        recipient.set_entry(0, self.key_at(last), self.rid_at(last));
        recipient.set_size(r_size + 1);
        self.set_size(last);
        recipient.key_at(0)
    }
}
