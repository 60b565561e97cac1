use std::sync::Arc;
use anyhow::{ensure, Result};
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;

use crabdb::common::types::{PageId, INVALID_PAGE_ID};
use crabdb::index::btree::page::{self, InternalPage, LeafPage};
use crabdb::index::btree::{BPlusTree, IndexKey};
use crabdb::storage::buffer::BufferPoolManager;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

#[allow(dead_code)]
pub fn init_logging() {
    Lazy::force(&LOGGER);
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager backed by a temporary database file. The
// file handle must be kept alive for as long as the pool is used.
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_logging();
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, path)?);
    Ok((buffer_pool, file))
}

// Walk the whole tree and verify the structural invariants: strict key
// ordering, the min/max occupancy bounds (root exempt from the min bound),
// the routing bounds of every internal slot, and agreement between the
// in-order traversal and the leaf chain. Returns the keys in order.
#[allow(dead_code)]
pub fn check_tree_invariants<K: IndexKey>(
    tree: &BPlusTree<K>,
    buffer_pool: &Arc<BufferPoolManager>,
) -> Result<Vec<K>> {
    let root_id = tree.root_page_id()?;
    if root_id == INVALID_PAGE_ID {
        ensure!(tree.iter()?.next().is_none(), "empty tree with a non-empty scan");
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    let depth = check_subtree::<K>(buffer_pool, root_id, true, None, None, &mut keys)?;
    ensure!(depth >= 1, "tree must have at least one level");

    for window in keys.windows(2) {
        ensure!(window[0] < window[1], "in-order keys not strictly ascending");
    }

    // The leaf chain must yield exactly the in-order traversal.
    let chained: Vec<K> = tree
        .iter()?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    ensure!(chained == keys, "leaf chain disagrees with in-order traversal");

    Ok(keys)
}

// Returns the subtree depth; collects keys in order. `lower` is an
// inclusive bound, `upper` exclusive, per the routing invariant.
#[allow(dead_code)]
fn check_subtree<K: IndexKey>(
    buffer_pool: &Arc<BufferPoolManager>,
    page_id: PageId,
    is_root: bool,
    lower: Option<K>,
    upper: Option<K>,
    keys: &mut Vec<K>,
) -> Result<usize> {
    let guard = buffer_pool.fetch_page_basic(page_id)?;
    let page = guard.page();

    if page::is_leaf_page(&page.data) {
        let leaf = LeafPage::<_, K>::new(&page.data[..]);
        if !is_root {
            ensure!(
                leaf.size() >= leaf.min_size(),
                "leaf {page_id} underfull: {} < {}",
                leaf.size(),
                leaf.min_size()
            );
        }
        ensure!(leaf.size() <= leaf.max_size(), "leaf {page_id} overfull");
        for i in 0..leaf.size() {
            let key = leaf.key_at(i);
            if let Some(lower) = lower {
                ensure!(key >= lower, "leaf {page_id} key below its routing bound");
            }
            if let Some(upper) = upper {
                ensure!(key < upper, "leaf {page_id} key above its routing bound");
            }
            keys.push(key);
        }
        return Ok(1);
    }

    let (size, max_size, min_size, entries) = {
        let internal = InternalPage::<_, K>::new(&page.data[..]);
        (
            internal.size(),
            internal.max_size(),
            internal.min_size(),
            internal.entries(),
        )
    };
    drop(page);
    drop(guard);

    if is_root {
        ensure!(size >= 2, "internal root {page_id} has fewer than two children");
    } else {
        ensure!(
            size >= min_size,
            "internal {page_id} underfull: {size} < {min_size}"
        );
    }
    ensure!(size <= max_size, "internal {page_id} overfull");

    let mut depth = None;
    for (i, &(_, child)) in entries.iter().enumerate() {
        let child_lower = if i == 0 { lower } else { Some(entries[i].0) };
        let child_upper = if i + 1 < size {
            Some(entries[i + 1].0)
        } else {
            upper
        };
        if i > 0 {
            if let Some(lower) = lower {
                ensure!(entries[i].0 >= lower, "separator below subtree bound");
            }
            if let Some(upper) = upper {
                ensure!(entries[i].0 < upper, "separator above subtree bound");
            }
        }
        let child_depth =
            check_subtree::<K>(buffer_pool, child, false, child_lower, child_upper, keys)?;
        match depth {
            None => depth = Some(child_depth),
            Some(depth) => {
                ensure!(depth == child_depth, "unbalanced subtree under {page_id}")
            }
        }
    }
    Ok(depth.expect("internal page with no children") + 1)
}
