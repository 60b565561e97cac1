use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{self, HeaderPage, InternalPage, LeafPage};
use crate::index::btree::tree::{BPlusTree, Context, CrabMode};
use crate::storage::buffer::WritePageGuard;

impl<K: IndexKey> BPlusTree<K> {
    /// Remove a key, rebalancing underfull pages by merge or rotation.
    /// Returns whether the key existed.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let header_guard = self.bpm().fetch_page_write(self.header_page_id())?;
        let root_id = HeaderPage::new(&header_guard.data[..]).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = self.crab_to_leaf(header_guard, root_id, key, CrabMode::Delete)?;
        let mut leaf_guard = ctx
            .write_set
            .pop_back()
            .expect("crabbed path must end at a leaf");

        let (removed, underfull) = {
            let page = leaf_guard.as_mut();
            let mut leaf = LeafPage::<_, K>::new(&mut page.data[..]);
            let removed = leaf.remove(key);
            (removed, removed && leaf.size() < leaf.min_size())
        };
        if !removed {
            return Ok(false);
        }

        if underfull {
            self.merge_or_redistribute(&mut ctx, leaf_guard)?;
        }
        Ok(true)
    }

    /// Bring an underfull page back within bounds: merge with a sibling if
    /// the pair fits in one page, otherwise rotate one entry across the
    /// boundary. Merges may leave the parent underfull, propagating the
    /// repair upward through the crabbed path.
    fn merge_or_redistribute(
        &self,
        ctx: &mut Context,
        mut guard: WritePageGuard,
    ) -> Result<(), BTreeError> {
        let pid = guard.page_id();
        if ctx.root_page_id == pid {
            return self.adjust_root(ctx, guard);
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("underfull non-root page must have a latched parent");

        // The sibling is the right neighbor only for the leftmost child.
        let (index, sibling_index) = {
            let parent = InternalPage::<_, K>::new(&parent_guard.data[..]);
            let index = parent
                .value_index(pid)
                .expect("child pointer missing from its parent");
            (index, if index == 0 { 1 } else { index - 1 })
        };
        let sibling_pid =
            InternalPage::<_, K>::new(&parent_guard.data[..]).child_at(sibling_index);
        let mut sibling_guard = self.bpm().fetch_page_write(sibling_pid)?;

        if page::is_leaf_page(&guard.data) {
            let fits_in_one = {
                let node = LeafPage::<_, K>::new(&guard.data[..]);
                let sibling = LeafPage::<_, K>::new(&sibling_guard.data[..]);
                node.size() + sibling.size() < node.max_size()
            };

            if fits_in_one {
                let remove_index = if index == 0 { sibling_index } else { index };
                if index == 0 {
                    // Pull the right sibling into this page.
                    let sibling_page = sibling_guard.as_mut();
                    let mut sibling = LeafPage::<_, K>::new(&mut sibling_page.data[..]);
                    let node_page = guard.as_mut();
                    let mut node = LeafPage::<_, K>::new(&mut node_page.data[..]);
                    sibling.move_all_into(&mut node);
                    drop(sibling_guard);
                    if !self.bpm().delete_page(sibling_pid) {
                        log::warn!("merged leaf {sibling_pid} still pinned; left to the replacer");
                    }
                } else {
                    // Fold this page into its left sibling.
                    let node_page = guard.as_mut();
                    let mut node = LeafPage::<_, K>::new(&mut node_page.data[..]);
                    let sibling_page = sibling_guard.as_mut();
                    let mut sibling = LeafPage::<_, K>::new(&mut sibling_page.data[..]);
                    node.move_all_into(&mut sibling);
                    drop(guard);
                    if !self.bpm().delete_page(pid) {
                        log::warn!("merged leaf {pid} still pinned; left to the replacer");
                    }
                }
                log::debug!("merged leaf pair around parent slot {remove_index}");
                return self.remove_parent_entry(ctx, parent_guard, remove_index);
            }

            // Redistribute one entry and patch the separator.
            let node_page = guard.as_mut();
            let mut node = LeafPage::<_, K>::new(&mut node_page.data[..]);
            let sibling_page = sibling_guard.as_mut();
            let mut sibling = LeafPage::<_, K>::new(&mut sibling_page.data[..]);
            let parent_page = parent_guard.as_mut();
            let mut parent = InternalPage::<_, K>::new(&mut parent_page.data[..]);
            if index == 0 {
                let separator = sibling.move_front_to(&mut node);
                parent.set_key_at(1, separator);
            } else {
                let separator = sibling.move_end_to(&mut node);
                parent.set_key_at(index, separator);
            }
            return Ok(());
        }

        // Internal node.
        let fits_in_one = {
            let node = InternalPage::<_, K>::new(&guard.data[..]);
            let sibling = InternalPage::<_, K>::new(&sibling_guard.data[..]);
            node.size() + sibling.size() <= node.max_size()
        };

        if fits_in_one {
            let remove_index = if index == 0 { sibling_index } else { index };
            let middle_key =
                InternalPage::<_, K>::new(&parent_guard.data[..]).key_at(remove_index);
            if index == 0 {
                let sibling_page = sibling_guard.as_mut();
                let mut sibling = InternalPage::<_, K>::new(&mut sibling_page.data[..]);
                let node_page = guard.as_mut();
                let mut node = InternalPage::<_, K>::new(&mut node_page.data[..]);
                sibling.move_all_into(&mut node, middle_key);
                drop(sibling_guard);
                if !self.bpm().delete_page(sibling_pid) {
                    log::warn!(
                        "merged internal page {sibling_pid} still pinned; left to the replacer"
                    );
                }
            } else {
                let node_page = guard.as_mut();
                let mut node = InternalPage::<_, K>::new(&mut node_page.data[..]);
                let sibling_page = sibling_guard.as_mut();
                let mut sibling = InternalPage::<_, K>::new(&mut sibling_page.data[..]);
                node.move_all_into(&mut sibling, middle_key);
                drop(guard);
                if !self.bpm().delete_page(pid) {
                    log::warn!(
                        "merged internal page {pid} still pinned; left to the replacer"
                    );
                }
            }
            log::debug!("merged internal pair around parent slot {remove_index}");
            return self.remove_parent_entry(ctx, parent_guard, remove_index);
        }

        let node_page = guard.as_mut();
        let mut node = InternalPage::<_, K>::new(&mut node_page.data[..]);
        let sibling_page = sibling_guard.as_mut();
        let mut sibling = InternalPage::<_, K>::new(&mut sibling_page.data[..]);
        let parent_page = parent_guard.as_mut();
        let mut parent = InternalPage::<_, K>::new(&mut parent_page.data[..]);
        if index == 0 {
            let parent_key = parent.key_at(1);
            let separator = sibling.move_front_to(&mut node, parent_key);
            parent.set_key_at(1, separator);
        } else {
            let parent_key = parent.key_at(index);
            let separator = sibling.move_end_to(&mut node, parent_key);
            parent.set_key_at(index, separator);
        }
        Ok(())
    }

    /// Drop the separator entry a merge consumed; repair the parent in turn
    /// if it underflows.
    fn remove_parent_entry(
        &self,
        ctx: &mut Context,
        mut parent_guard: WritePageGuard,
        remove_index: usize,
    ) -> Result<(), BTreeError> {
        let parent_underfull = {
            let page = parent_guard.as_mut();
            let mut parent = InternalPage::<_, K>::new(&mut page.data[..]);
            parent.remove_at(remove_index);
            parent.size() < parent.min_size()
        };
        if parent_underfull {
            return self.merge_or_redistribute(ctx, parent_guard);
        }
        Ok(())
    }

    /// Shrink at the top: an empty leaf root empties the tree; an internal
    /// root with a single child hands the root role to that child.
    fn adjust_root(&self, ctx: &mut Context, guard: WritePageGuard) -> Result<(), BTreeError> {
        let pid = guard.page_id();

        if page::is_leaf_page(&guard.data) {
            if LeafPage::<_, K>::new(&guard.data[..]).size() == 0 {
                let header = ctx
                    .header
                    .as_mut()
                    .expect("header latch released before a root collapse");
                HeaderPage::new(&mut header.as_mut().data[..])
                    .set_root_page_id(INVALID_PAGE_ID);
                ctx.root_page_id = INVALID_PAGE_ID;
                drop(guard);
                if !self.bpm().delete_page(pid) {
                    log::warn!("collapsed root {pid} still pinned; left to the replacer");
                }
                log::debug!("tree emptied, root {pid} deleted");
            }
            return Ok(());
        }

        let root = InternalPage::<_, K>::new(&guard.data[..]);
        if root.size() == 1 {
            let new_root = root.child_at(0);
            let header = ctx
                .header
                .as_mut()
                .expect("header latch released before a root collapse");
            HeaderPage::new(&mut header.as_mut().data[..]).set_root_page_id(new_root);
            ctx.root_page_id = new_root;
            drop(guard);
            if !self.bpm().delete_page(pid) {
                log::warn!("collapsed root {pid} still pinned; left to the replacer");
            }
            log::debug!("root collapsed, {new_root} promoted");
        }
        Ok(())
    }
}
