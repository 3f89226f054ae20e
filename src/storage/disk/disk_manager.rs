use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::{
    PageId, Result, StorageError, BITMAP_CAPACITY, INVALID_PAGE_ID, MAX_EXTENTS,
    MAX_VALID_PAGE_ID, PAGE_SIZE,
};

use super::{BitmapPage, DiskFileMetaPage};

/// Physical page holding the [`DiskFileMetaPage`].
const META_PAGE_ID: u64 = 0;

/// Maps a logical page id to its physical page number in the file.
///
/// File layout (N = bitmap capacity):
/// `| Meta | Bitmap 1 | Page 1 .. Page N | Bitmap 2 | Page N+1 .. Page 2N | ...`
pub fn map_page_id(logical_page_id: PageId) -> u64 {
    let logical = logical_page_id.as_i32() as u64;
    let extent = logical / BITMAP_CAPACITY as u64;
    let bitmap_physical = extent * (BITMAP_CAPACITY as u64 + 1) + 1;
    bitmap_physical + logical % BITMAP_CAPACITY as u64 + 1
}

fn bitmap_physical_id(extent: usize) -> u64 {
    extent as u64 * (BITMAP_CAPACITY as u64 + 1) + 1
}

/// File handle and allocator state, guarded together by one lock.
struct DiskState {
    db_file: File,
    meta: DiskFileMetaPage,
    /// Bitmap per extent, grown on demand
    bitmaps: Vec<BitmapPage>,
    closed: bool,
}

/// DiskManager maps logical pages onto a single database file and owns the
/// extent/bitmap allocator. Every bitmap and meta change is written back
/// before the call returns.
pub struct DiskManager {
    state: Mutex<DiskState>,
    /// Path to the database file
    db_path: PathBuf,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it if needed, and
    /// loads the allocator state it contains.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let mut state = DiskState {
            db_file: file,
            meta: DiskFileMetaPage::new(),
            bitmaps: Vec::new(),
            closed: false,
        };

        let mut buf = [0u8; PAGE_SIZE];
        state.read_physical_page(META_PAGE_ID, &mut buf)?;
        state.meta = DiskFileMetaPage::from_bytes(&buf);

        let last_used_extent = state
            .meta
            .extent_used_page
            .iter()
            .rposition(|&used| used > 0);
        if let Some(last) = last_used_extent {
            for extent in 0..=last {
                if state.meta.extent_used_page(extent) > 0 {
                    state.read_physical_page(bitmap_physical_id(extent), &mut buf)?;
                    state.bitmaps.push(BitmapPage::from_bytes(&buf));
                } else {
                    state.bitmaps.push(BitmapPage::new());
                }
            }
        }

        debug!(
            "opened {} with {} allocated pages in {} extents",
            db_path.as_ref().display(),
            state.meta.num_allocated_pages,
            state.meta.num_extents
        );

        Ok(Self {
            state: Mutex::new(state),
            db_path: db_path.as_ref().to_path_buf(),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads a logical page into `data`. Reading past the end of the file
    /// zero-fills the buffer.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();
        state.read_physical_page(map_page_id(page_id), data)?;
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` to a logical page.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();
        state.write_physical_page(map_page_id(page_id), data)?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a logical page: first extent with room, first free bit in
    /// its bitmap. Returns `INVALID_PAGE_ID` when the file has no room left.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();

        if state.meta.num_allocated_pages as usize >= MAX_VALID_PAGE_ID {
            warn!("allocation failed: all {} pages in use", MAX_VALID_PAGE_ID);
            return Ok(INVALID_PAGE_ID);
        }

        let extent = match state.meta.first_extent_with_space() {
            Some(extent) => extent,
            None => {
                warn!("allocation failed: no extent slot left");
                return Ok(INVALID_PAGE_ID);
            }
        };

        while state.bitmaps.len() <= extent {
            state.bitmaps.push(BitmapPage::new());
        }

        let offset = match state.bitmaps[extent].allocate_page() {
            Some(offset) => offset,
            None => {
                warn!("allocation failed: bitmap of extent {} is full", extent);
                return Ok(INVALID_PAGE_ID);
            }
        };

        let opened_extent = state.meta.extent_used_page[extent] == 0;
        if opened_extent {
            state.meta.num_extents += 1;
        }
        state.meta.extent_used_page[extent] += 1;
        state.meta.num_allocated_pages += 1;

        if let Err(e) = state.persist_extent(extent) {
            // Undo in memory so the bit is not handed out as allocated
            state.bitmaps[extent].deallocate_page(offset);
            state.meta.extent_used_page[extent] -= 1;
            state.meta.num_allocated_pages -= 1;
            if opened_extent {
                state.meta.num_extents -= 1;
            }
            warn!("allocation in extent {} rolled back: {}", extent, e);
            return Err(e);
        }
        self.num_writes.fetch_add(2, Ordering::Relaxed);

        let page_id = PageId::new((extent * BITMAP_CAPACITY) as i32 + offset as i32);
        debug!("allocated {} in extent {}", page_id, extent);
        Ok(page_id)
    }

    /// Frees a logical page. Freeing a page that is not allocated is a no-op.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(StorageError::InvalidPageId(page_id));
        }

        let (extent, offset) = Self::locate(page_id);
        let mut state = self.state.lock();

        let freed = match state.bitmaps.get_mut(extent) {
            Some(bitmap) => bitmap.deallocate_page(offset),
            None => false,
        };
        if !freed {
            debug!("deallocate of {} ignored, page is not allocated", page_id);
            return Ok(());
        }

        state.meta.num_allocated_pages -= 1;
        state.meta.extent_used_page[extent] -= 1;
        if state.meta.extent_used_page[extent] == 0 {
            state.meta.num_extents -= 1;
        }

        state.persist_bitmap(extent)?;
        state.persist_meta()?;
        self.num_writes.fetch_add(2, Ordering::Relaxed);

        debug!("deallocated {} in extent {}", page_id, extent);
        Ok(())
    }

    /// Returns whether `page_id` is currently unallocated.
    pub fn is_page_free(&self, page_id: PageId) -> bool {
        if !page_id.is_valid() || page_id.as_i32() as usize >= MAX_VALID_PAGE_ID {
            return false;
        }
        let (extent, offset) = Self::locate(page_id);
        let state = self.state.lock();
        state
            .bitmaps
            .get(extent)
            .map_or(true, |bitmap| bitmap.is_page_free(offset))
    }

    /// Writes the meta page and bitmaps, syncs and marks the file closed.
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }

        state.persist_meta()?;
        for extent in 0..state.bitmaps.len() {
            state.persist_bitmap(extent)?;
        }
        state.db_file.sync_all()?;
        state.closed = true;
        Ok(())
    }

    /// Returns the number of allocated logical pages.
    pub fn num_allocated_pages(&self) -> u32 {
        self.state.lock().meta.num_allocated_pages
    }

    /// Returns the number of extents holding at least one page.
    pub fn num_extents(&self) -> u32 {
        self.state.lock().meta.num_extents
    }

    /// Returns the number of allocated pages in `extent`.
    pub fn extent_used_pages(&self, extent: usize) -> u32 {
        self.state.lock().meta.extent_used_page(extent)
    }

    /// Returns the number of set bits across every bitmap.
    pub fn count_allocated_bits(&self) -> u32 {
        self.state
            .lock()
            .bitmaps
            .iter()
            .map(BitmapPage::count_set_bits)
            .sum()
    }

    /// Returns the number of disk reads performed.
    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn locate(page_id: PageId) -> (usize, u32) {
        let logical = page_id.as_i32() as usize;
        (
            logical / BITMAP_CAPACITY,
            (logical % BITMAP_CAPACITY) as u32,
        )
    }
}

impl DiskState {
    fn read_physical_page(&mut self, physical_id: u64, data: &mut [u8]) -> Result<()> {
        let offset = physical_id * PAGE_SIZE as u64;
        let file_len = self.db_file.metadata()?.len();
        if offset >= file_len {
            debug!("read of physical page {} past end of file", physical_id);
            data.fill(0);
            return Ok(());
        }

        self.db_file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < data.len() {
            let n = self.db_file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < data.len() {
            debug!("short read of physical page {}", physical_id);
            data[filled..].fill(0);
        }
        Ok(())
    }

    fn write_physical_page(&mut self, physical_id: u64, data: &[u8]) -> Result<()> {
        let offset = physical_id * PAGE_SIZE as u64;
        self.db_file.seek(SeekFrom::Start(offset))?;
        self.db_file.write_all(data)?;
        self.db_file.flush()?;
        Ok(())
    }

    fn persist_bitmap(&mut self, extent: usize) -> Result<()> {
        debug_assert!(extent < MAX_EXTENTS);
        let mut buf = [0u8; PAGE_SIZE];
        self.bitmaps[extent].to_bytes(&mut buf);
        self.write_physical_page(bitmap_physical_id(extent), &buf)
    }

    fn persist_meta(&mut self) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.meta.to_bytes(&mut buf);
        self.write_physical_page(META_PAGE_ID, &buf)
    }

    fn persist_extent(&mut self, extent: usize) -> Result<()> {
        self.persist_bitmap(extent)?;
        self.persist_meta()
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close {}: {}", self.db_path.display(), e);
        }
    }
}
