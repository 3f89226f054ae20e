use super::error::{Result, StorageError};
use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Logical page reserved for the catalog's metadata. Its contents belong to
/// the catalog; the storage layer only makes sure it exists.
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// Logical page holding the `index_id -> root_page_id` table.
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Bytes at the front of a bitmap page used for its own bookkeeping.
pub const BITMAP_HEADER_SIZE: usize = 8;

/// Number of data pages a single bitmap page tracks.
pub const BITMAP_CAPACITY: usize = (PAGE_SIZE - BITMAP_HEADER_SIZE) * 8;

/// Number of extents the disk meta page can describe.
pub const MAX_EXTENTS: usize = (PAGE_SIZE - 8) / 4;

/// One past the largest logical page id the allocator can hand out.
pub const MAX_VALID_PAGE_ID: usize = MAX_EXTENTS * BITMAP_CAPACITY;

/// Tunables for a storage engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool
    pub pool_size: usize,
    /// Max entries per B+Tree leaf; `None` packs a page full
    pub leaf_max_size: Option<usize>,
    /// Max children per B+Tree internal node; `None` packs a page full
    pub internal_max_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            leaf_max_size: None,
            internal_max_size: None,
        }
    }
}

impl EngineConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_fanout(mut self, leaf_max_size: usize, internal_max_size: usize) -> Self {
        self.leaf_max_size = Some(leaf_max_size);
        self.internal_max_size = Some(internal_max_size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(StorageError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if let Some(leaf) = self.leaf_max_size {
            if leaf < 2 {
                return Err(StorageError::InvalidConfig(format!(
                    "leaf_max_size {} is below 2",
                    leaf
                )));
            }
        }
        if let Some(internal) = self.internal_max_size {
            if internal < 3 {
                return Err(StorageError::InvalidConfig(format!(
                    "internal_max_size {} is below 3",
                    internal
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(BITMAP_CAPACITY, 32704);
        assert_eq!(MAX_EXTENTS, 1022);
    }

    #[test]
    fn test_config_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::default().with_pool_size(0).validate().is_err());
        assert!(EngineConfig::default().with_fanout(1, 4).validate().is_err());
        assert!(EngineConfig::default().with_fanout(4, 2).validate().is_err());
        assert!(EngineConfig::default().with_fanout(2, 3).validate().is_ok());
    }
}
