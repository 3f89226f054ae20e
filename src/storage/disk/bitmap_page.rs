use bytes::{Buf, BufMut};

use crate::common::{BITMAP_CAPACITY, BITMAP_HEADER_SIZE, MAX_EXTENTS, PAGE_SIZE};

const MAX_CHARS: usize = PAGE_SIZE - BITMAP_HEADER_SIZE;

/// Free-space bitmap for one extent.
///
/// Layout: `u32 page_allocated | u32 next_free_page | bitmap bytes`.
/// Bit `i` of byte `i / 8` is set when data page `i` of the extent is in use.
#[derive(Clone)]
pub struct BitmapPage {
    page_allocated: u32,
    next_free_page: u32,
    bytes: Box<[u8; MAX_CHARS]>,
}

impl BitmapPage {
    pub fn new() -> Self {
        Self {
            page_allocated: 0,
            next_free_page: 0,
            bytes: Box::new([0u8; MAX_CHARS]),
        }
    }

    /// Number of pages a single bitmap can track.
    pub const fn max_supported_size() -> usize {
        BITMAP_CAPACITY
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut header = &data[..BITMAP_HEADER_SIZE];
        let page_allocated = header.get_u32_le();
        let next_free_page = header.get_u32_le();
        let mut bytes = Box::new([0u8; MAX_CHARS]);
        bytes.copy_from_slice(&data[BITMAP_HEADER_SIZE..]);
        Self {
            page_allocated,
            next_free_page,
            bytes,
        }
    }

    pub fn to_bytes(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut header = &mut data[..BITMAP_HEADER_SIZE];
        header.put_u32_le(self.page_allocated);
        header.put_u32_le(self.next_free_page);
        data[BITMAP_HEADER_SIZE..].copy_from_slice(&self.bytes[..]);
    }

    /// Allocates the first free page (first fit) and returns its offset
    /// within the extent, or `None` when the extent is full.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.page_allocated as usize >= BITMAP_CAPACITY {
            return None;
        }

        let byte_index = self.bytes.iter().position(|&b| b != u8::MAX)?;
        let bit_index = (!self.bytes[byte_index]).trailing_zeros();
        let offset = (byte_index as u32) * 8 + bit_index;

        self.bytes[byte_index] |= 1 << bit_index;
        self.page_allocated += 1;
        self.next_free_page = self.find_next_free(offset);
        Some(offset)
    }

    /// Clears the bit for `page_offset`. Returns false if it was already free.
    pub fn deallocate_page(&mut self, page_offset: u32) -> bool {
        if page_offset as usize >= BITMAP_CAPACITY || self.is_page_free(page_offset) {
            return false;
        }

        let (byte_index, bit_index) = Self::locate(page_offset);
        self.bytes[byte_index] &= !(1 << bit_index);
        self.page_allocated -= 1;
        if page_offset < self.next_free_page {
            self.next_free_page = page_offset;
        }
        true
    }

    pub fn is_page_free(&self, page_offset: u32) -> bool {
        if page_offset as usize >= BITMAP_CAPACITY {
            return false;
        }
        let (byte_index, bit_index) = Self::locate(page_offset);
        self.bytes[byte_index] & (1 << bit_index) == 0
    }

    pub fn page_allocated(&self) -> u32 {
        self.page_allocated
    }

    /// Lowest free offset, or the capacity when the extent is full.
    pub fn next_free_page(&self) -> u32 {
        self.next_free_page
    }

    /// Number of set bits, recomputed from the bitmap itself.
    pub fn count_set_bits(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    fn find_next_free(&self, from: u32) -> u32 {
        (from..BITMAP_CAPACITY as u32)
            .find(|&offset| self.is_page_free(offset))
            .unwrap_or(BITMAP_CAPACITY as u32)
    }

    fn locate(page_offset: u32) -> (usize, u8) {
        ((page_offset / 8) as usize, (page_offset % 8) as u8)
    }
}

impl Default for BitmapPage {
    fn default() -> Self {
        Self::new()
    }
}

/// The disk file's global metadata, stored in physical page 0.
///
/// Layout: `u32 num_allocated_pages | u32 num_extents | u32[MAX_EXTENTS] extent_used_page`.
#[derive(Clone)]
pub struct DiskFileMetaPage {
    pub num_allocated_pages: u32,
    /// Extents that currently hold at least one allocated page
    pub num_extents: u32,
    pub extent_used_page: Box<[u32; MAX_EXTENTS]>,
}

impl DiskFileMetaPage {
    pub fn new() -> Self {
        Self {
            num_allocated_pages: 0,
            num_extents: 0,
            extent_used_page: Box::new([0u32; MAX_EXTENTS]),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut buf = data;
        let num_allocated_pages = buf.get_u32_le();
        let num_extents = buf.get_u32_le();
        let mut extent_used_page = Box::new([0u32; MAX_EXTENTS]);
        for used in extent_used_page.iter_mut() {
            *used = buf.get_u32_le();
        }
        Self {
            num_allocated_pages,
            num_extents,
            extent_used_page,
        }
    }

    pub fn to_bytes(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut buf = data;
        buf.put_u32_le(self.num_allocated_pages);
        buf.put_u32_le(self.num_extents);
        for &used in self.extent_used_page.iter() {
            buf.put_u32_le(used);
        }
    }

    pub fn extent_used_page(&self, extent: usize) -> u32 {
        self.extent_used_page.get(extent).copied().unwrap_or(0)
    }

    /// First extent with room for another page, scanning in order.
    pub fn first_extent_with_space(&self) -> Option<usize> {
        self.extent_used_page
            .iter()
            .position(|&used| (used as usize) < BITMAP_CAPACITY)
    }
}

impl Default for DiskFileMetaPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_first_fit() {
        let mut bitmap = BitmapPage::new();

        assert_eq!(bitmap.allocate_page(), Some(0));
        assert_eq!(bitmap.allocate_page(), Some(1));
        assert_eq!(bitmap.allocate_page(), Some(2));
        assert_eq!(bitmap.page_allocated(), 3);

        assert!(bitmap.deallocate_page(1));
        assert!(bitmap.is_page_free(1));
        assert_eq!(bitmap.next_free_page(), 1);

        // The hole is reused before growing
        assert_eq!(bitmap.allocate_page(), Some(1));
        assert_eq!(bitmap.allocate_page(), Some(3));
    }

    #[test]
    fn test_bitmap_double_free_rejected() {
        let mut bitmap = BitmapPage::new();
        let offset = bitmap.allocate_page().unwrap();

        assert!(bitmap.deallocate_page(offset));
        assert!(!bitmap.deallocate_page(offset));
        assert_eq!(bitmap.page_allocated(), 0);
    }

    #[test]
    fn test_bitmap_full() {
        let mut bitmap = BitmapPage::new();
        for i in 0..BitmapPage::max_supported_size() {
            assert_eq!(bitmap.allocate_page(), Some(i as u32));
        }

        assert_eq!(bitmap.allocate_page(), None);
        assert_eq!(bitmap.next_free_page(), BITMAP_CAPACITY as u32);
        assert_eq!(bitmap.count_set_bits(), BITMAP_CAPACITY as u32);

        assert!(bitmap.deallocate_page(100));
        assert_eq!(bitmap.allocate_page(), Some(100));
    }

    #[test]
    fn test_bitmap_bytes_roundtrip() {
        let mut bitmap = BitmapPage::new();
        for _ in 0..20 {
            bitmap.allocate_page();
        }
        bitmap.deallocate_page(7);

        let mut data = [0u8; PAGE_SIZE];
        bitmap.to_bytes(&mut data);
        let restored = BitmapPage::from_bytes(&data);

        assert_eq!(restored.page_allocated(), 19);
        assert!(restored.is_page_free(7));
        assert!(!restored.is_page_free(8));
        assert_eq!(restored.count_set_bits(), 19);
    }

    #[test]
    fn test_meta_page_layout() {
        let mut meta = DiskFileMetaPage::new();
        meta.num_allocated_pages = 5;
        meta.num_extents = 2;
        meta.extent_used_page[0] = 3;
        meta.extent_used_page[1] = 2;

        let mut data = [0u8; PAGE_SIZE];
        meta.to_bytes(&mut data);

        assert_eq!(&data[0..4], &5u32.to_le_bytes());
        assert_eq!(&data[4..8], &2u32.to_le_bytes());
        assert_eq!(&data[8..12], &3u32.to_le_bytes());

        let restored = DiskFileMetaPage::from_bytes(&data);
        assert_eq!(restored.extent_used_page(1), 2);
        assert_eq!(restored.first_extent_with_space(), Some(0));
    }
}
