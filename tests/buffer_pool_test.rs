//! Integration tests for the buffer pool manager

use std::sync::Arc;
use std::thread;

use minisql::buffer::BufferPoolManager;
use minisql::common::{PageId, StorageError};
use minisql::storage::disk::DiskManager;
use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = BufferPoolManager::new(pool_size, dm);
    (bpm, temp_file)
}

#[test]
fn test_buffer_pool_basic_operations() {
    let (bpm, _temp) = create_bpm(10);

    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        guard.page_id()
    };
    assert_eq!(page_id, PageId::new(0));
    assert_eq!(bpm.get_pin_count(page_id), Some(0));

    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(bpm.get_pin_count(page_id), Some(1));
}

#[test]
fn test_buffer_pool_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();
    let test_data = b"Persistence test data";

    let page_id = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, Arc::clone(&dm));

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[..test_data.len()].copy_from_slice(test_data);
            guard.page_id()
        };
        assert!(bpm.flush_page(page_id).unwrap());
        dm.close().unwrap();
        page_id
    };

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = BufferPoolManager::new(10, dm);
    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(&guard.data()[..test_data.len()], test_data);
}

#[test]
fn test_buffer_pool_eviction_writes_back() {
    let (bpm, _temp) = create_bpm(3);

    let mut page_ids = Vec::new();
    for i in 0..3u8 {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = i;
        page_ids.push(guard.page_id());
    }
    for &pid in &page_ids {
        assert_eq!(bpm.get_pin_count(pid), Some(0));
    }

    // Evicts the least recently unpinned page, which was dirty
    let new_pid = bpm.new_page().unwrap().page_id();
    assert_eq!(new_pid, PageId::new(3));
    assert_eq!(bpm.get_pin_count(page_ids[0]), None);

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
    }
}

#[test]
fn test_buffer_pool_pin_prevents_eviction() {
    let (bpm, _temp) = create_bpm(2);

    let guard1 = bpm.new_page().unwrap();
    let guard2 = bpm.new_page().unwrap();
    let allocated = bpm.disk_manager().num_allocated_pages();

    assert!(matches!(bpm.new_page(), Err(StorageError::BufferPoolFull)));
    // A failed new_page leaves no page behind on disk
    assert_eq!(bpm.disk_manager().num_allocated_pages(), allocated);

    let pid1 = guard1.page_id();
    drop(guard1);
    let guard3 = bpm.new_page().unwrap();
    assert_eq!(bpm.get_pin_count(pid1), None);

    drop(guard2);
    drop(guard3);
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_buffer_pool_fetch_fails_when_all_pinned() {
    let (bpm, _temp) = create_bpm(1);

    let first = bpm.new_page().unwrap().page_id();
    let _held = bpm.new_page().unwrap();

    assert!(matches!(
        bpm.fetch_page_read(first),
        Err(StorageError::BufferPoolFull)
    ));
}

#[test]
fn test_buffer_pool_delete_page() {
    let (bpm, _temp) = create_bpm(10);

    let pid = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = 42;
        guard.page_id()
    };

    {
        let _guard = bpm.fetch_page_read(pid).unwrap();
        // Pinned pages stay put
        assert!(!bpm.delete_page(pid).unwrap());
    }

    assert!(bpm.delete_page(pid).unwrap());
    assert_eq!(bpm.get_pin_count(pid), None);
    assert!(bpm.is_page_free(pid));
    assert_eq!(bpm.free_frame_count(), 10);

    // The freed id is handed out again with zeroed contents
    let guard = bpm.new_page().unwrap();
    assert_eq!(guard.page_id(), pid);
    assert!(guard.data().iter().all(|&b| b == 0));
}

#[test]
fn test_buffer_pool_unpin_unpinned_page() {
    let (bpm, _temp) = create_bpm(4);

    let pid = bpm.new_page().unwrap().page_id();
    assert!(!bpm.unpin_page(pid, false));
    assert!(!bpm.unpin_page(PageId::new(99), true));
}

#[test]
fn test_buffer_pool_flush_all() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_ids = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = BufferPoolManager::new(10, Arc::clone(&dm));

        let page_ids = (0..5u8)
            .map(|i| {
                let mut guard = bpm.new_page().unwrap();
                guard.data_mut()[0] = i;
                guard.page_id()
            })
            .collect::<Vec<_>>();

        bpm.flush_all_pages().unwrap();
        dm.close().unwrap();
        page_ids
    };

    let dm = Arc::new(DiskManager::new(&path).unwrap());
    let bpm = BufferPoolManager::new(10, dm);
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data()[0], i as u8);
    }
}

#[test]
fn test_buffer_pool_concurrent_access() {
    let (bpm, _temp) = create_bpm(10);
    let bpm = Arc::new(bpm);

    let page_id = bpm.new_page().unwrap().page_id();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for _ in 0..100 {
                    let mut guard = bpm.fetch_page_write(page_id).unwrap();
                    let count = u32::from_le_bytes(guard.data()[..4].try_into().unwrap());
                    guard.data_mut()[..4].copy_from_slice(&(count + 1).to_le_bytes());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let guard = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(u32::from_le_bytes(guard.data()[..4].try_into().unwrap()), 400);
}

#[test]
fn test_buffer_pool_random_workload() {
    let (bpm, _temp) = create_bpm(5);
    let mut rng = rand::thread_rng();

    // Pool is much smaller than the working set, so pages keep cycling
    let page_ids: Vec<_> = (0..40).map(|_| bpm.new_page().unwrap().page_id()).collect();
    let mut expected = vec![0u32; page_ids.len()];

    for _ in 0..500 {
        let i = rng.gen_range(0..page_ids.len());
        if rng.gen_bool(0.5) {
            let value = rng.gen::<u32>();
            let mut guard = bpm.fetch_page_write(page_ids[i]).unwrap();
            guard.data_mut()[..4].copy_from_slice(&value.to_le_bytes());
            expected[i] = value;
        } else {
            let guard = bpm.fetch_page_read(page_ids[i]).unwrap();
            let stored = u32::from_le_bytes(guard.data()[..4].try_into().unwrap());
            assert_eq!(stored, expected[i]);
        }
    }

    let mut order: Vec<usize> = (0..page_ids.len()).collect();
    order.shuffle(&mut rng);
    for i in order {
        let guard = bpm.fetch_page_read(page_ids[i]).unwrap();
        assert_eq!(
            u32::from_le_bytes(guard.data()[..4].try_into().unwrap()),
            expected[i]
        );
    }
    assert!(bpm.check_all_unpinned());
}
