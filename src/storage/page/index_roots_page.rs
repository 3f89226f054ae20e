use crate::common::{IndexId, PageId, PAGE_SIZE};

// | count (4) | (index_id (4), root_page_id (4)) * count |
const COUNT_OFFSET: usize = 0;
const ENTRIES_OFFSET: usize = 4;
const ENTRY_SIZE: usize = 8;

/// Number of indexes whose roots fit on one page.
pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn entry_offset(index: usize) -> usize {
    ENTRIES_OFFSET + index * ENTRY_SIZE
}

fn count(data: &[u8]) -> usize {
    (read_u32(data, COUNT_OFFSET) as usize).min(MAX_INDEX_ROOTS)
}

fn entry(data: &[u8], index: usize) -> (IndexId, PageId) {
    let offset = entry_offset(index);
    (
        read_u32(data, offset),
        PageId::new(read_u32(data, offset + 4) as i32),
    )
}

fn find(data: &[u8], index_id: IndexId) -> Option<usize> {
    (0..count(data)).find(|&i| entry(data, i).0 == index_id)
}

/// Mutable view over the page mapping index ids to B+Tree root pages.
pub struct IndexRootsPage<'a> {
    data: &'a mut [u8],
}

impl<'a> IndexRootsPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
    }

    pub fn count(&self) -> usize {
        count(self.data)
    }

    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        find(self.data, index_id).map(|i| entry(self.data, i).1)
    }

    /// Records a new index. Returns false if it is already present or the
    /// page is full.
    pub fn insert(&mut self, index_id: IndexId, root_page_id: PageId) -> bool {
        if find(self.data, index_id).is_some() {
            return false;
        }
        let count = self.count();
        if count >= MAX_INDEX_ROOTS {
            return false;
        }
        self.set_entry(count, index_id, root_page_id);
        self.set_count(count + 1);
        true
    }

    /// Changes the root of a recorded index. Returns false if it is absent.
    pub fn update(&mut self, index_id: IndexId, root_page_id: PageId) -> bool {
        match find(self.data, index_id) {
            Some(i) => {
                self.set_entry(i, index_id, root_page_id);
                true
            }
            None => false,
        }
    }

    /// Forgets an index. The last entry takes its slot.
    pub fn delete(&mut self, index_id: IndexId) -> bool {
        let i = match find(self.data, index_id) {
            Some(i) => i,
            None => return false,
        };
        let last = self.count() - 1;
        if i < last {
            let (last_id, last_root) = entry(self.data, last);
            self.set_entry(i, last_id, last_root);
        }
        self.set_count(last);
        true
    }

    fn set_count(&mut self, count: usize) {
        self.data[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn set_entry(&mut self, index: usize, index_id: IndexId, root_page_id: PageId) {
        let offset = entry_offset(index);
        self.data[offset..offset + 4].copy_from_slice(&index_id.to_le_bytes());
        self.data[offset + 4..offset + 8].copy_from_slice(&root_page_id.as_i32().to_le_bytes());
    }
}

/// Read-only view over the index roots page.
pub struct IndexRootsPageRef<'a> {
    data: &'a [u8],
}

impl<'a> IndexRootsPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn count(&self) -> usize {
        count(self.data)
    }

    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        find(self.data, index_id).map(|i| entry(self.data, i).1)
    }

    pub fn entries(&self) -> Vec<(IndexId, PageId)> {
        (0..self.count()).map(|i| entry(self.data, i)).collect()
    }
}
