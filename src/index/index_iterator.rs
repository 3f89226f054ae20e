use crate::buffer::ReadPageGuard;
use crate::common::{PageId, Result, StorageError, INVALID_PAGE_ID};

use super::b_plus_tree_page::{BPlusTreePage, LeafNode};
use super::{BPlusTree, IndexKey, IndexValue, KeyComparator};

/// Forward cursor over the leaf level of a [`BPlusTree`].
///
/// The iterator keeps its current leaf pinned. Moving to the next leaf pins
/// it before the previous one is released.
pub struct IndexIterator<'a, K, V, C> {
    tree: &'a BPlusTree<K, V, C>,
    guard: Option<ReadPageGuard>,
    leaf: Option<LeafNode<K, V>>,
    index: usize,
    /// Failure met while advancing, reported by the next call to `next`
    pending_error: Option<StorageError>,
}

impl<'a, K, V, C> IndexIterator<'a, K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    pub(crate) fn new(tree: &'a BPlusTree<K, V, C>, page_id: PageId, index: usize) -> Result<Self> {
        let mut iter = Self::empty(tree);
        iter.load(page_id)?;
        iter.index = index;
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    /// Iterator over an empty tree; equal to that tree's `end()`.
    pub(crate) fn empty(tree: &'a BPlusTree<K, V, C>) -> Self {
        Self {
            tree,
            guard: None,
            leaf: None,
            index: 0,
            pending_error: None,
        }
    }

    /// Page id of the current leaf, `INVALID_PAGE_ID` for an empty tree.
    pub fn page_id(&self) -> PageId {
        self.leaf.as_ref().map_or(INVALID_PAGE_ID, |leaf| leaf.page_id)
    }

    /// Position within the current leaf.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn is_end(&self) -> bool {
        match &self.leaf {
            Some(leaf) => self.index >= leaf.size(),
            None => true,
        }
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<(&K, &V)> {
        let leaf = self.leaf.as_ref()?;
        leaf.entries.get(self.index).map(|(k, v)| (k, v))
    }

    /// Moves one entry forward, following the leaf chain when needed.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }
        self.index += 1;
        self.skip_exhausted_leaves()
    }

    fn load(&mut self, page_id: PageId) -> Result<()> {
        let guard = self.tree.bpm().fetch_page_read(page_id)?;
        let leaf = match BPlusTreePage::from_bytes(guard.data())? {
            BPlusTreePage::Leaf(leaf) => leaf,
            BPlusTreePage::Internal(_) => {
                return Err(StorageError::IndexCorrupted(format!(
                    "iterator reached internal {}",
                    page_id
                )))
            }
        };
        // Replacing the guard releases the previous leaf
        self.guard = Some(guard);
        self.leaf = Some(leaf);
        Ok(())
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        while let Some(leaf) = &self.leaf {
            if self.index < leaf.size() || leaf.next_page_id == INVALID_PAGE_ID {
                break;
            }
            let next_page_id = leaf.next_page_id;
            self.load(next_page_id)?;
            self.index = 0;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.leaf = None;
        self.guard = None;
        self.index = 0;
    }
}

impl<'a, K, V, C> Iterator for IndexIterator<'a, K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }

        let item = self
            .current()
            .map(|(key, value)| (key.clone(), *value))?;
        if let Err(e) = self.advance() {
            self.release();
            self.pending_error = Some(e);
        }
        Some(Ok(item))
    }
}

impl<'a, K, V, C> PartialEq for IndexIterator<'a, K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.index == other.index
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::common::EngineConfig;
    use crate::index::{BPlusTree, BasicComparator};
    use crate::storage::StorageEngine;
    use tempfile::NamedTempFile;

    #[test]
    fn test_iterator_walks_leaf_chain() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();
        let mut tree: BPlusTree<i32, i32, _> =
            BPlusTree::new(0, Arc::clone(engine.bpm()), BasicComparator, Some(3), Some(3)).unwrap();

        assert!(tree.begin().unwrap() == tree.end().unwrap());

        for k in (0..40).rev() {
            tree.insert(k * 2, k).unwrap();
        }

        let keys: Vec<i32> = tree.begin().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys, (0..40).map(|k| k * 2).collect::<Vec<_>>());

        // Starts at the first key not below the probe
        let mut iter = tree.begin_from(&31).unwrap();
        assert_eq!(iter.current().map(|(k, v)| (*k, *v)), Some((32, 16)));
        iter.advance().unwrap();
        assert_eq!(iter.current().map(|(k, _)| *k), Some(34));

        let mut iter = tree.begin_from(&1000).unwrap();
        assert!(iter.is_end());
        assert!(iter == tree.end().unwrap());
        assert!(iter.next().is_none());

        let mut iter = tree.begin().unwrap();
        for _ in 0..40 {
            iter.advance().unwrap();
        }
        assert!(iter == tree.end().unwrap());

        drop(iter);
        assert!(tree.check());
    }
}
