use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::BufferPoolManager;
use crate::common::{
    EngineConfig, IndexId, Result, StorageError, CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID,
};
use crate::index::{BPlusTree, BPlusTreeIndex, IndexKey, IndexValue, KeyComparator};
use crate::storage::disk::DiskManager;
use crate::storage::page::IndexRootsPage;

/// One open database file: the disk manager, the buffer pool over it and
/// the two pages every database reserves.
pub struct StorageEngine {
    config: EngineConfig,
    bpm: Arc<BufferPoolManager>,
    disk_manager: Arc<DiskManager>,
}

impl StorageEngine {
    /// Opens `db_path`, creating and initialising it if it is new.
    pub fn open<P: AsRef<Path>>(db_path: P, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let fresh = disk_manager.num_allocated_pages() == 0;
        let bpm = Arc::new(BufferPoolManager::new(
            config.pool_size,
            Arc::clone(&disk_manager),
        ));

        let engine = Self {
            config,
            bpm,
            disk_manager,
        };

        if fresh {
            engine.reserve_pages()?;
        } else if engine.bpm.is_page_free(CATALOG_META_PAGE_ID)
            || engine.bpm.is_page_free(INDEX_ROOTS_PAGE_ID)
        {
            return Err(StorageError::IndexCorrupted(format!(
                "{} lacks its reserved pages",
                engine.disk_manager.db_path().display()
            )));
        }

        debug!(
            "opened {} with {} frames",
            engine.disk_manager.db_path().display(),
            engine.config.pool_size
        );
        Ok(engine)
    }

    /// Allocates the catalog meta page and an empty index roots page.
    fn reserve_pages(&self) -> Result<()> {
        let catalog_page_id = self.bpm.new_page()?.page_id();

        let roots_page_id = {
            let mut guard = self.bpm.new_page()?;
            IndexRootsPage::new(guard.data_mut()).init();
            guard.page_id()
        };

        if catalog_page_id != CATALOG_META_PAGE_ID || roots_page_id != INDEX_ROOTS_PAGE_ID {
            return Err(StorageError::IndexCorrupted(format!(
                "reserved pages landed at {} and {}",
                catalog_page_id, roots_page_id
            )));
        }

        self.bpm.flush_page(CATALOG_META_PAGE_ID)?;
        self.bpm.flush_page(INDEX_ROOTS_PAGE_ID)?;
        Ok(())
    }

    pub fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the typed B+Tree recorded under `index_id` with the configured
    /// fan-out.
    pub fn open_tree<K, V, C>(&self, index_id: IndexId, comparator: C) -> Result<BPlusTree<K, V, C>>
    where
        K: IndexKey,
        V: IndexValue,
        C: KeyComparator<K>,
    {
        BPlusTree::new(
            index_id,
            Arc::clone(&self.bpm),
            comparator,
            self.config.leaf_max_size,
            self.config.internal_max_size,
        )
    }

    /// Opens the byte-keyed index recorded under `index_id`.
    pub fn open_index(&self, index_id: IndexId, max_key_len: usize) -> Result<BPlusTreeIndex> {
        BPlusTreeIndex::new(index_id, max_key_len, Arc::clone(&self.bpm), &self.config)
    }

    /// Writes every dirty page and the allocator state to disk.
    pub fn close(&self) -> Result<()> {
        self.bpm.flush_all_pages()?;
        self.disk_manager.close()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close storage engine: {}", e);
        }
    }
}
