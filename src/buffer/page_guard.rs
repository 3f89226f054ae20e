use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::FrameHeader;

/// Runs when a guard is dropped, with the page id and whether it was mutated.
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

type PageData = Box<[u8; PAGE_SIZE]>;

/// State shared by both guard kinds. The frame `Arc` keeps the locked data
/// alive for as long as the guard exists.
struct PageGuardBase {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }

    fn release(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// Pinned, shared access to one page. Dropping it unpins the page clean.
pub struct ReadPageGuard {
    data_guard: Option<RwLockReadGuard<'static, PageData>>,
    base: PageGuardBase,
}

impl ReadPageGuard {
    /// # Safety
    /// `frame` must be pinned for as long as the guard lives.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read();
        // The frame is kept alive through the Arc held by `base`
        let data_guard: RwLockReadGuard<'static, PageData> = std::mem::transmute(data_guard);

        Self {
            data_guard: Some(data_guard),
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    /// Pin count of the underlying frame, including this guard's pin.
    pub fn pin_count(&self) -> u32 {
        self.base.frame.pin_count()
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the data lock before the pool reacquires its own latch
        self.data_guard.take();
        self.base.release();
    }
}

/// Pinned, exclusive access to one page. Dropping it unpins the page, dirty
/// if [`WritePageGuard::data_mut`] was ever called.
pub struct WritePageGuard {
    data_guard: Option<RwLockWriteGuard<'static, PageData>>,
    base: PageGuardBase,
}

impl WritePageGuard {
    /// # Safety
    /// `frame` must be pinned for as long as the guard lives.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write();
        // The frame is kept alive through the Arc held by `base`
        let data_guard: RwLockWriteGuard<'static, PageData> = std::mem::transmute(data_guard);

        Self {
            data_guard: Some(data_guard),
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    /// Mutable page bytes. Marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        match &mut self.data_guard {
            Some(guard) => &mut guard[..],
            None => &mut [],
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.base.is_dirty
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.base.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_read_page_guard() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        frame.copy_from(&data);

        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let guard = unsafe {
            ReadPageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    assert!(!is_dirty);
                    released_clone.store(true, Ordering::SeqCst);
                }),
            )
        };

        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(guard[0], 42);
        assert!(!released.load(Ordering::SeqCst));

        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_page_guard_marks_dirty() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));

        let dirty = Arc::new(AtomicBool::new(false));
        let dirty_clone = dirty.clone();

        let mut guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, is_dirty| {
                    dirty_clone.store(is_dirty, Ordering::SeqCst);
                }),
            )
        };

        assert!(!guard.is_dirty());
        guard.data_mut()[0] = 42;
        assert!(guard.is_dirty());

        drop(guard);
        assert!(dirty.load(Ordering::SeqCst));

        let mut read_data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut read_data);
        assert_eq!(read_data[0], 42);
    }

    #[test]
    fn test_write_page_guard_releases_lock_before_callback() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        let frame_clone = frame.clone();

        let guard = unsafe {
            WritePageGuard::new(
                PageId::new(1),
                frame.clone(),
                Box::new(move |_, _| {
                    // Would deadlock if the write lock were still held
                    assert!(frame_clone.data.try_read().is_some());
                }),
            )
        };
        drop(guard);
    }
}
