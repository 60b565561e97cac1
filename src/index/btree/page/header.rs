use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::PageId;

/// View over the index header page: `[root_page_id: i32]`, remainder
/// zero-filled. The header page is created once per index and its id is
/// registered externally; it outlives every root the tree goes through.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    pub fn root_page_id(&self) -> PageId {
        LittleEndian::read_i32(&self.data.as_ref()[0..4])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    pub fn set_root_page_id(&mut self, root_page_id: PageId) {
        LittleEndian::write_i32(&mut self.data.as_mut()[0..4], root_page_id);
    }
}
