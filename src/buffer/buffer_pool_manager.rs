use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::common::{FrameId, PageId, Result, StorageError, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruReplacer, ReadPageGuard, Replacer, WritePageGuard};

/// Tables guarded by the pool latch.
struct PoolTables {
    /// Maps resident page ids to their frames
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
}

/// State shared between the pool and the release callbacks of its guards.
struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    /// One latch for every public operation
    tables: Mutex<PoolTables>,
    replacer: LruReplacer,
    disk_scheduler: DiskScheduler,
}

/// BufferPoolManager caches disk pages in a fixed set of frames. Pages are
/// handed out pinned, through RAII guards that unpin them on drop; an
/// unpinned page becomes an LRU eviction candidate.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames over `disk_manager`.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            tables: Mutex::new(PoolTables {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
        });

        Self { pool_size, state }
    }

    /// Allocates a fresh zeroed page and returns it pinned for writing.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned and with
    /// `OutOfSpace` when the disk manager has no page left. A disk page that
    /// was allocated but could not get a frame is given back.
    pub fn new_page(&self) -> Result<WritePageGuard> {
        let frame = {
            let mut tables = self.state.tables.lock();

            if tables.free_list.is_empty() && self.state.replacer.size() == 0 {
                warn!("new_page: all {} frames are pinned", self.pool_size);
                return Err(StorageError::BufferPoolFull);
            }

            let disk_manager = self.state.disk_scheduler.disk_manager();
            let page_id = disk_manager.allocate_page()?;
            if page_id == INVALID_PAGE_ID {
                return Err(StorageError::OutOfSpace);
            }

            let frame_id = match self.state.acquire_frame(&mut tables) {
                Ok(frame_id) => frame_id,
                Err(e) => {
                    disk_manager.deallocate_page(page_id)?;
                    return Err(e);
                }
            };

            let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
            frame.set_page_id(page_id);
            frame.pin();
            // Zeroed bytes must reach disk even if nobody writes the page
            frame.set_dirty(true);
            tables.page_table.insert(page_id, frame_id);

            trace!("new page {} in {}", page_id, frame_id);
            frame
        };

        let page_id = frame.page_id();
        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Fetches `page_id` pinned for shared reading.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.state.pin_page(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Fetches `page_id` pinned for exclusive writing.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.state.pin_page(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, self.release_callback()) })
    }

    /// Drops one pin on `page_id`, marking it dirty if requested. Returns
    /// false when the page is not resident or was not pinned.
    ///
    /// Guards call this on drop; calling it directly for a page still held by
    /// a guard makes that guard's own release fail.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin_page(page_id, is_dirty)
    }

    /// Removes a resident `page_id` from the pool and frees it on disk.
    ///
    /// Returns `Ok(false)` while the page is pinned. A page that is not
    /// resident is left alone and reported as deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut tables = self.state.tables.lock();

        let frame_id = match tables.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                trace!("delete of non-resident {} is a no-op", page_id);
                return Ok(true);
            }
        };

        let frame = &self.state.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            debug!("delete of pinned {} refused", page_id);
            return Ok(false);
        }

        self.state
            .disk_scheduler
            .disk_manager()
            .deallocate_page(page_id)?;

        tables.page_table.remove(&page_id);
        self.state.replacer.pin(frame_id);
        frame.reset();
        tables.free_list.push_back(frame_id);

        trace!("deleted {}", page_id);
        Ok(true)
    }

    /// Writes `page_id` to disk if it is resident. Pin state is unchanged.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let frame = {
            let tables = self.state.tables.lock();
            match tables.page_table.get(&page_id) {
                Some(&frame_id) => {
                    let frame = Arc::clone(&self.state.frames[frame_id.as_usize()]);
                    self.state.pin_frame(&frame);
                    frame
                }
                None => return Ok(false),
            }
        };

        let outcome = self.state.write_back(page_id, &frame);
        self.state.unpin_page(page_id, false);
        outcome.map(|()| true)
    }

    /// Writes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        self.state.flush_all()
    }

    /// True when no frame holds a pin. Used to check that callers released
    /// every page they fetched.
    pub fn check_all_unpinned(&self) -> bool {
        let _tables = self.state.tables.lock();
        let mut all_unpinned = true;
        for frame in &self.state.frames {
            if frame.pin_count() > 0 {
                warn!(
                    "{} still pinned {} time(s) in {}",
                    frame.page_id(),
                    frame.pin_count(),
                    frame.frame_id()
                );
                all_unpinned = false;
            }
        }
        all_unpinned
    }

    /// Pin count of a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let tables = self.state.tables.lock();
        tables
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    /// Whether `page_id` is unallocated on disk.
    pub fn is_page_free(&self, page_id: PageId) -> bool {
        self.state.disk_scheduler.disk_manager().is_page_free(page_id)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Frames that have never held a page or were returned by `delete_page`.
    pub fn free_frame_count(&self) -> usize {
        self.state.tables.lock().free_list.len()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.state.disk_scheduler.disk_manager()
    }

    fn release_callback(&self) -> Box<dyn FnOnce(PageId, bool) + Send + Sync> {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| {
            state.unpin_page(page_id, is_dirty);
        })
    }
}

impl BufferPoolState {
    /// Pins `page_id`, reading it from disk on a miss.
    fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut tables = self.tables.lock();

        if let Some(&frame_id) = tables.page_table.get(&page_id) {
            trace!("hit {} in {}", page_id, frame_id);
            let frame = Arc::clone(&self.frames[frame_id.as_usize()]);
            self.pin_frame(&frame);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut tables)?;
        let frame = Arc::clone(&self.frames[frame_id.as_usize()]);

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk_scheduler.schedule_read_sync(page_id, &mut data) {
            tables.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        tables.page_table.insert(page_id, frame_id);

        trace!("miss {} loaded into {}", page_id, frame_id);
        Ok(frame)
    }

    fn pin_frame(&self, frame: &FrameHeader) {
        if frame.pin() == 1 {
            self.replacer.pin(frame.frame_id());
        }
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let tables = self.tables.lock();

        let frame_id = match tables.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                warn!("unpin of non-resident {}", page_id);
                return false;
            }
        };

        let frame = &self.frames[frame_id.as_usize()];
        if is_dirty {
            frame.set_dirty(true);
        }
        match frame.unpin() {
            Some(0) => {
                self.replacer.unpin(frame_id);
                true
            }
            Some(_) => true,
            None => {
                warn!("unpin of {} with pin count 0", page_id);
                false
            }
        }
    }

    /// Takes a frame from the free list, or evicts the LRU victim after
    /// writing it back if dirty. The returned frame is reset and unmapped.
    fn acquire_frame(&self, tables: &mut PoolTables) -> Result<FrameId> {
        if let Some(frame_id) = tables.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.victim() {
            Some(frame_id) => frame_id,
            None => {
                warn!("no free or evictable frame");
                return Err(StorageError::BufferPoolFull);
            }
        };

        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            if let Err(e) = self.write_back(old_page_id, frame) {
                self.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        tables.page_table.remove(&old_page_id);
        frame.reset();
        trace!("evicted {} from {}", old_page_id, frame_id);
        Ok(frame_id)
    }

    fn write_back(&self, page_id: PageId, frame: &FrameHeader) -> Result<()> {
        let mut data = [0u8; PAGE_SIZE];
        frame.take_snapshot(&mut data);
        if let Err(e) = self.disk_scheduler.schedule_write_sync(page_id, &data) {
            frame.set_dirty(true);
            return Err(e);
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let dirty: Vec<(PageId, Arc<FrameHeader>)> = {
            let tables = self.tables.lock();
            tables
                .page_table
                .iter()
                .map(|(&page_id, &frame_id)| (page_id, &self.frames[frame_id.as_usize()]))
                .filter(|(_, frame)| frame.is_dirty())
                .map(|(page_id, frame)| {
                    self.pin_frame(frame);
                    (page_id, Arc::clone(frame))
                })
                .collect()
        };

        let mut outcome = Ok(());
        for (page_id, frame) in &dirty {
            if outcome.is_ok() {
                outcome = self.write_back(*page_id, frame);
            }
            self.unpin_page(*page_id, false);
        }
        outcome
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.state.flush_all() {
            warn!("failed to flush buffer pool on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new_page() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.free_frame_count(), 10);

        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert_eq!(page_id, PageId::new(0));
        assert!(guard.data().iter().all(|&b| b == 0));
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);

        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_read_write() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = {
            let mut guard = bpm.new_page().unwrap();
            guard.data_mut()[0] = 42;
            guard.data_mut()[100] = 255;
            guard.page_id()
        };

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(guard[0], 42);
        assert_eq!(guard[100], 255);
    }

    #[test]
    fn test_buffer_pool_manager_unpin_unpinned_fails() {
        let (bpm, _temp) = create_bpm(4);

        let page_id = bpm.new_page().unwrap().page_id();
        assert!(!bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(PageId::new(77), false));
    }

    #[test]
    fn test_buffer_pool_manager_shared_readers() {
        let (bpm, _temp) = create_bpm(4);

        let page_id = bpm.new_page().unwrap().page_id();
        let r1 = bpm.fetch_page_read(page_id).unwrap();
        let r2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
        assert_eq!(r1.pin_count(), 2);

        drop(r1);
        drop(r2);
        assert!(bpm.check_all_unpinned());
    }

    #[test]
    fn test_buffer_pool_manager_full() {
        let (bpm, _temp) = create_bpm(2);

        let _guard1 = bpm.new_page().unwrap();
        let _guard2 = bpm.new_page().unwrap();

        assert!(matches!(bpm.new_page(), Err(StorageError::BufferPoolFull)));
        // The refused request must not leak a disk page
        assert!(bpm.is_page_free(PageId::new(2)));
    }

    #[test]
    fn test_buffer_pool_manager_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let page_id = bpm.new_page().unwrap().page_id();

        {
            let _guard = bpm.fetch_page_read(page_id).unwrap();
            assert!(!bpm.delete_page(page_id).unwrap());
        }

        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert!(bpm.is_page_free(page_id));
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_buffer_pool_manager_delete_non_resident_page() {
        let (bpm, _temp) = create_bpm(1);

        let evicted = bpm.new_page().unwrap().page_id();
        let resident = bpm.new_page().unwrap().page_id();
        assert_eq!(bpm.get_pin_count(evicted), None);

        // Nothing to drop from the pool, and the disk page stays allocated
        assert!(bpm.delete_page(evicted).unwrap());
        assert!(!bpm.is_page_free(evicted));
        assert_eq!(bpm.get_pin_count(resident), Some(0));
    }

    #[test]
    fn test_buffer_pool_manager_invalid_page() {
        let (bpm, _temp) = create_bpm(2);
        assert!(matches!(
            bpm.fetch_page_read(INVALID_PAGE_ID),
            Err(StorageError::InvalidPageId(_))
        ));
        assert!(matches!(
            bpm.flush_page(INVALID_PAGE_ID),
            Err(StorageError::InvalidPageId(_))
        ));
    }
}
