use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::page::{HeaderPage, InternalPage, LeafPage};
use crate::index::btree::tree::{BPlusTree, Context, CrabMode};
use crate::storage::buffer::WritePageGuard;

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a key/rid pair. Returns false if the key is already present;
    /// keys are unique within the tree.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header_guard = self.bpm().fetch_page_write(self.header_page_id())?;
        let root_id = HeaderPage::new(&header_guard.data[..]).root_page_id();

        if root_id == INVALID_PAGE_ID {
            self.start_new_tree(&mut header_guard, key, rid)?;
            return Ok(true);
        }

        let mut ctx = self.crab_to_leaf(header_guard, root_id, &key, CrabMode::Insert)?;
        let mut leaf_guard = ctx
            .write_set
            .pop_back()
            .expect("crabbed path must end at a leaf");
        let leaf_pid = leaf_guard.page_id();

        let (inserted, needs_split) = {
            let page = leaf_guard.as_mut();
            let mut leaf = LeafPage::<_, K>::new(&mut page.data[..]);
            let inserted = leaf.insert(key, rid);
            (inserted, inserted && leaf.size() == leaf.max_size())
        };
        if !inserted {
            return Ok(false);
        }

        if needs_split {
            let (mut new_guard, new_pid) = self.bpm().new_page_write()?;
            let separator = {
                let new_page = new_guard.as_mut();
                let mut new_leaf = LeafPage::<_, K>::new(&mut new_page.data[..]);
                new_leaf.init(self.leaf_max_size());

                let page = leaf_guard.as_mut();
                let mut leaf = LeafPage::<_, K>::new(&mut page.data[..]);
                let separator = leaf.split_into(&mut new_leaf);
                new_leaf.set_next_page_id(leaf.next_page_id());
                leaf.set_next_page_id(new_pid);
                separator
            };
            log::debug!("split leaf {leaf_pid}, new right sibling {new_pid}");
            self.insert_into_parent(&mut ctx, leaf_pid, separator, new_pid)?;
        }

        Ok(true)
    }

    /// First insert into an empty tree: a single leaf becomes the root,
    /// installed under the still-held header write latch.
    fn start_new_tree(
        &self,
        header_guard: &mut WritePageGuard,
        key: K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (mut root_guard, root_pid) = self.bpm().new_page_write()?;
        {
            let page = root_guard.as_mut();
            let mut leaf = LeafPage::<_, K>::new(&mut page.data[..]);
            leaf.init(self.leaf_max_size());
            leaf.insert(key, rid);
        }
        HeaderPage::new(&mut header_guard.as_mut().data[..]).set_root_page_id(root_pid);
        log::debug!("started new tree with root leaf {root_pid}");
        Ok(())
    }

    /// Propagate a split upward: hang `separator`/`right_pid` off the
    /// parent of `left_pid`, splitting the parent in turn when full. A
    /// split of the root grows the tree by one level under the header
    /// latch the context still holds.
    fn insert_into_parent(
        &self,
        ctx: &mut Context,
        left_pid: PageId,
        separator: K,
        right_pid: PageId,
    ) -> Result<(), BTreeError> {
        if ctx.root_page_id == left_pid {
            let (mut root_guard, root_pid) = self.bpm().new_page_write()?;
            {
                let page = root_guard.as_mut();
                let mut root = InternalPage::<_, K>::new(&mut page.data[..]);
                root.init(self.internal_max_size());
                root.create_new_root(separator, left_pid, right_pid);
            }
            let header = ctx
                .header
                .as_mut()
                .expect("header latch released before a root split");
            HeaderPage::new(&mut header.as_mut().data[..]).set_root_page_id(root_pid);
            ctx.root_page_id = root_pid;
            log::debug!("root split: new root {root_pid}");
            return Ok(());
        }

        let mut parent_guard = ctx
            .write_set
            .pop_back()
            .expect("split propagation ran past the crabbed path");
        let parent_pid = parent_guard.page_id();

        let page = parent_guard.as_mut();
        let mut parent = InternalPage::<_, K>::new(&mut page.data[..]);

        if parent.size() < parent.max_size() {
            parent.insert(separator, right_pid);
            return Ok(());
        }

        // Full parent: splice the new entry into a scratch copy, then split
        // it across the old page and a fresh sibling.
        let mut entries = parent.entries();
        let pos = entries[1..].partition_point(|(k, _)| *k <= separator) + 1;
        entries.insert(pos, (separator, right_pid));

        let min_size = (self.internal_max_size() + 1) / 2;
        let right_entries = entries.split_off(min_size);
        let promoted = right_entries[0].0;
        parent.write_entries(&entries);

        let (mut new_guard, new_pid) = self.bpm().new_page_write()?;
        {
            let new_page = new_guard.as_mut();
            let mut new_internal = InternalPage::<_, K>::new(&mut new_page.data[..]);
            new_internal.init(self.internal_max_size());
            new_internal.write_entries(&right_entries);
        }
        log::debug!("split internal {parent_pid}, new right sibling {new_pid}");

        self.insert_into_parent(ctx, parent_pid, promoted, new_pid)
    }
}
