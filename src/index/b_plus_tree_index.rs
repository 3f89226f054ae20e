use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::BufferPoolManager;
use crate::common::{EngineConfig, IndexId, Result, RowId, StorageError};

use super::{BPlusTree, GenericComparator, GenericKey};

/// Key widths an index can be created with.
pub const INDEX_KEY_WIDTHS: [usize; 5] = [4, 8, 16, 32, 64];

/// Smallest supported key width that holds `max_key_len` bytes. A length of
/// 0 means unknown and selects the widest key.
pub fn key_size_for(max_key_len: usize) -> Result<usize> {
    if max_key_len == 0 {
        return Ok(64);
    }
    INDEX_KEY_WIDTHS
        .iter()
        .copied()
        .find(|&width| width >= max_key_len)
        .ok_or(StorageError::KeyTooLong {
            len: max_key_len,
            width: 64,
        })
}

type Tree<const N: usize> = BPlusTree<GenericKey<N>, RowId, GenericComparator>;

/// A B+Tree instantiated for one key width.
pub enum IndexKeyWidth {
    W4(Tree<4>),
    W8(Tree<8>),
    W16(Tree<16>),
    W32(Tree<32>),
    W64(Tree<64>),
}

macro_rules! with_tree {
    ($width:expr, $tree:ident => $body:expr) => {
        match $width {
            IndexKeyWidth::W4($tree) => $body,
            IndexKeyWidth::W8($tree) => $body,
            IndexKeyWidth::W16($tree) => $body,
            IndexKeyWidth::W32($tree) => $body,
            IndexKeyWidth::W64($tree) => $body,
        }
    };
}

/// Byte-keyed index over row ids, the surface the executor talks to.
///
/// Keys are the encoded bytes of the indexed columns; the tree behind it is
/// chosen by key width at creation time. Writers are serialized by the lock.
pub struct BPlusTreeIndex {
    index_id: IndexId,
    key_size: usize,
    tree: RwLock<IndexKeyWidth>,
}

impl BPlusTreeIndex {
    /// Opens (or starts) the index `index_id` for keys of up to
    /// `max_key_len` bytes.
    pub fn new(
        index_id: IndexId,
        max_key_len: usize,
        bpm: Arc<BufferPoolManager>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let key_size = key_size_for(max_key_len)?;
        let leaf = config.leaf_max_size;
        let internal = config.internal_max_size;

        let tree = match key_size {
            4 => IndexKeyWidth::W4(BPlusTree::new(index_id, bpm, GenericComparator, leaf, internal)?),
            8 => IndexKeyWidth::W8(BPlusTree::new(index_id, bpm, GenericComparator, leaf, internal)?),
            16 => IndexKeyWidth::W16(BPlusTree::new(index_id, bpm, GenericComparator, leaf, internal)?),
            32 => IndexKeyWidth::W32(BPlusTree::new(index_id, bpm, GenericComparator, leaf, internal)?),
            _ => IndexKeyWidth::W64(BPlusTree::new(index_id, bpm, GenericComparator, leaf, internal)?),
        };

        Ok(Self {
            index_id,
            key_size,
            tree: RwLock::new(tree),
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Returns `Ok(false)` if the key is already indexed.
    pub fn insert_entry(&self, key: &[u8], rid: RowId) -> Result<bool> {
        let mut tree = self.tree.write();
        with_tree!(&mut *tree, t => t.insert(GenericKey::from_bytes(key)?, rid))
    }

    /// Removing an absent key is not an error.
    pub fn remove_entry(&self, key: &[u8]) -> Result<()> {
        let mut tree = self.tree.write();
        with_tree!(&mut *tree, t => t.remove(&GenericKey::from_bytes(key)?).map(|_| ()))
    }

    pub fn scan_key(&self, key: &[u8]) -> Result<Option<RowId>> {
        let tree = self.tree.read();
        with_tree!(&*tree, t => t.get_value(&GenericKey::from_bytes(key)?))
    }

    /// Every entry whose key is not less than `key`, in key order.
    pub fn scan_from(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, RowId)>> {
        let tree = self.tree.read();
        with_tree!(&*tree, t => t
            .begin_from(&GenericKey::from_bytes(key)?)?
            .map(|entry| entry.map(|(k, rid)| (k.as_bytes().to_vec(), rid)))
            .collect())
    }

    /// Every entry, in key order.
    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, RowId)>> {
        let tree = self.tree.read();
        with_tree!(&*tree, t => t
            .begin()?
            .map(|entry| entry.map(|(k, rid)| (k.as_bytes().to_vec(), rid)))
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        let tree = self.tree.read();
        with_tree!(&*tree, t => t.is_empty())
    }

    pub fn verify(&self) -> Result<()> {
        let tree = self.tree.read();
        with_tree!(&*tree, t => t.verify())
    }

    /// Frees every page of the index.
    pub fn destroy(&self) -> Result<()> {
        let mut tree = self.tree.write();
        with_tree!(&mut *tree, t => t.destroy())
    }
}
