use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use crabdb::storage::buffer::BufferPoolError;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10, 2)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_resident_page_pins_again() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10, 2)?;

    let (_, page_id) = buffer_pool.new_page()?;
    let _second = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(2));

    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_round_trip_through_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3, 2)?;

    // Write a recognizable payload and unpin dirty.
    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0..13].copy_from_slice(b"hello, world!");
    }
    drop(page);
    assert!(buffer_pool.unpin_page(page_id, true));

    // Force the page out of the pool.
    for _ in 0..3 {
        let (_, pid) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(pid, false));
    }

    // Fetch it back: the bytes must have survived the eviction write-back.
    let page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = page.read();
        assert_eq!(&page_guard.data[0..13], b"hello, world!");
    }
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_pool_exhaustion_and_recovery() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3, 2)?;

    // Pin three pages; the pool is now full of unevictable frames.
    let mut pages = Vec::new();
    for _ in 0..3 {
        pages.push(buffer_pool.new_page()?);
    }

    match buffer_pool.new_page() {
        Err(BufferPoolError::PoolExhausted) => {}
        other => panic!("expected PoolExhausted, got {other:?}"),
    }

    // Unpinning one page frees a victim.
    let first_id = pages[0].1;
    assert!(buffer_pool.unpin_page(first_id, false));
    let (_, new_id) = buffer_pool.new_page()?;
    assert_ne!(new_id, first_id);
    assert!(buffer_pool.unpin_page(new_id, false));
    Ok(())
}

#[test]
fn test_pinned_page_never_evicted() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3, 2)?;

    let (page, pinned_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0xAB;
    }

    // Churn the other two frames hard; the pinned page must stay resident.
    for _ in 0..10 {
        let (_, pid) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(pid, false));
    }

    assert_eq!(buffer_pool.pin_count(pinned_id), Some(1));
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, pinned_id);
        assert_eq!(page_guard.data[0], 0xAB);
    }
    assert!(buffer_pool.unpin_page(pinned_id, true));
    Ok(())
}

#[test]
fn test_unpin_dirty_flag_is_sticky() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[100] = 42;
    }
    // Two pins: drop one dirty, one clean. The clean unpin must not wash
    // out the dirty bit.
    let _again = buffer_pool.fetch_page(page_id)?;
    assert!(buffer_pool.unpin_page(page_id, true));
    assert!(buffer_pool.unpin_page(page_id, false));

    // Evict and fetch back; the modification must persist.
    for _ in 0..4 {
        let (_, pid) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(pid, false));
    }
    let page = buffer_pool.fetch_page(page_id)?;
    assert_eq!(page.read().data[100], 42);
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_page_clears_dirty() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[7] = 7;
    }
    assert!(buffer_pool.flush_page(page_id)?);
    assert!(!buffer_pool.flush_page(9999)?);

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_delete_page_semantics() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4, 2)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Pinned: refuse.
    assert!(!buffer_pool.delete_page(page_id));

    // Unpinned: drop it and free the frame.
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(buffer_pool.delete_page(page_id));
    assert_eq!(buffer_pool.pin_count(page_id), None);

    // Not resident: trivially true.
    assert!(buffer_pool.delete_page(page_id));
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(8, 2)?;

    let mut ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        page.write().data[0] = i;
        assert!(buffer_pool.unpin_page(page_id, true));
        ids.push(page_id);
    }
    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in ids.iter().enumerate() {
        let page = buffer_pool.fetch_page(page_id)?;
        assert_eq!(page.read().data[0], i as u8);
        assert!(buffer_pool.unpin_page(page_id, false));
    }
    Ok(())
}
