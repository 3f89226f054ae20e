use std::cmp::Ordering;

use bytes::{Buf, BufMut};

use crate::common::{PageId, Result, StorageError, INVALID_PAGE_ID, PAGE_SIZE};

use super::{IndexKey, IndexValue, KeyComparator};

// Common header:
// | page_type (4) | size (4) | max_size (4) | parent_page_id (4) | page_id (4) |
// Leaf pages follow it with | next_page_id (4) |, then the packed entries.
const PAGE_TYPE_OFFSET: usize = 0;
const PARENT_PAGE_ID_OFFSET: usize = 12;
const INTERNAL_HEADER_SIZE: usize = 20;
const LEAF_HEADER_SIZE: usize = 24;

const LEAF_PAGE_TYPE: u32 = 1;
const INTERNAL_PAGE_TYPE: u32 = 2;

/// Most `(key, value)` entries a leaf page can hold.
pub fn leaf_page_capacity<K: IndexKey, V: IndexValue>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_SIZE) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

/// Most `(key, child)` entries an internal page can hold.
pub fn internal_page_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (K::ENCODED_SIZE + 4)
}

/// Rewrites the parent pointer of an encoded node in place.
pub fn write_parent_page_id(data: &mut [u8], parent_page_id: PageId) {
    data[PARENT_PAGE_ID_OFFSET..PARENT_PAGE_ID_OFFSET + 4]
        .copy_from_slice(&parent_page_id.as_i32().to_le_bytes());
}

fn min_size_for(max_size: usize) -> usize {
    (max_size + 1) / 2
}

/// Leaf node: sorted `(key, value)` entries plus the right sibling link.
#[derive(Debug, Clone)]
pub struct LeafNode<K, V> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub next_page_id: PageId,
    pub max_size: usize,
    pub entries: Vec<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> LeafNode<K, V> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        Self {
            page_id,
            parent_page_id,
            next_page_id: INVALID_PAGE_ID,
            max_size,
            entries: Vec::with_capacity(max_size + 1),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size)
    }

    pub fn key_at(&self, index: usize) -> &K {
        &self.entries[index].0
    }

    /// Index of the first entry whose key is not less than `key`.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        self.entries
            .partition_point(|(k, _)| comparator.compare(k, key) == Ordering::Less)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        self.entries
            .binary_search_by(|(k, _)| comparator.compare(k, key))
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Inserts in sorted position. Returns false if the key is present.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, comparator: &C) -> bool {
        match self
            .entries
            .binary_search_by(|(k, _)| comparator.compare(k, &key))
        {
            Ok(_) => false,
            Err(index) => {
                self.entries.insert(index, (key, value));
                true
            }
        }
    }

    /// Removes `key`. Returns false if it was absent.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, comparator: &C) -> bool {
        match self
            .entries
            .binary_search_by(|(k, _)| comparator.compare(k, key))
        {
            Ok(index) => {
                self.entries.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Moves the upper half of the entries to the empty `recipient`.
    pub fn move_half_to(&mut self, recipient: &mut Self) {
        let split_at = self.entries.len() - self.entries.len() / 2;
        recipient.entries.extend(self.entries.drain(split_at..));
    }
}

/// Internal node: `(key, child)` entries where the key at index 0 is unused.
/// Child `i` holds keys in `[key(i), key(i + 1))`.
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: usize,
    pub entries: Vec<(K, PageId)>,
}

impl<K: IndexKey> InternalNode<K> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            entries: Vec::with_capacity(max_size + 1),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size)
    }

    pub fn key_at(&self, index: usize) -> &K {
        &self.entries[index].0
    }

    pub fn set_key_at(&mut self, index: usize, key: K) {
        self.entries[index].0 = key;
    }

    pub fn value_at(&self, index: usize) -> PageId {
        self.entries[index].1
    }

    pub fn value_index(&self, child: PageId) -> Option<usize> {
        self.entries.iter().position(|&(_, page_id)| page_id == child)
    }

    /// Child whose range covers `key`: the last child whose separator is
    /// not greater than `key`, or child 0.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        let not_greater = self.entries[1..]
            .partition_point(|(k, _)| comparator.compare(k, key) != Ordering::Greater);
        self.entries[not_greater].1
    }

    /// Fills a fresh root with two children split by `key`.
    pub fn populate_new_root(&mut self, old_child: PageId, key: K, new_child: PageId) {
        self.entries.clear();
        self.entries.push((key.clone(), old_child));
        self.entries.push((key, new_child));
    }

    /// Inserts `(key, new_child)` right after `old_child`.
    pub fn insert_node_after(&mut self, old_child: PageId, key: K, new_child: PageId) -> Result<()> {
        let index = self.value_index(old_child).ok_or_else(|| {
            StorageError::IndexCorrupted(format!(
                "{} is not a child of {}",
                old_child, self.page_id
            ))
        })?;
        self.entries.insert(index + 1, (key, new_child));
        Ok(())
    }

    pub fn remove(&mut self, index: usize) {
        self.entries.remove(index);
    }

    /// Moves the upper half of the entries to the empty `recipient`. The key
    /// landing at the recipient's index 0 is the separator for the parent.
    pub fn move_half_to(&mut self, recipient: &mut Self) {
        let split_at = self.entries.len() - self.entries.len() / 2;
        recipient.entries.extend(self.entries.drain(split_at..));
    }

    pub fn children(&self) -> impl Iterator<Item = PageId> + '_ {
        self.entries.iter().map(|&(_, page_id)| page_id)
    }
}

/// A decoded B+Tree page, tagged by node kind.
#[derive(Debug, Clone)]
pub enum BPlusTreePage<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

impl<K: IndexKey, V: IndexValue> BPlusTreePage<K, V> {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);
        let mut buf = data;
        let page_type = buf.get_u32_le();
        let size = buf.get_u32_le() as usize;
        let max_size = buf.get_u32_le() as usize;
        let parent_page_id = PageId::new(buf.get_i32_le());
        let page_id = PageId::new(buf.get_i32_le());

        match page_type {
            LEAF_PAGE_TYPE => {
                if size > leaf_page_capacity::<K, V>() {
                    return Err(Self::corrupted(page_id, "leaf size exceeds page capacity"));
                }
                let next_page_id = PageId::new(buf.get_i32_le());
                let mut leaf = LeafNode::new(page_id, parent_page_id, max_size);
                leaf.next_page_id = next_page_id;
                for _ in 0..size {
                    let key = K::read_from(&mut buf);
                    let value = V::read_from(&mut buf);
                    leaf.entries.push((key, value));
                }
                Ok(BPlusTreePage::Leaf(leaf))
            }
            INTERNAL_PAGE_TYPE => {
                if size > internal_page_capacity::<K>() {
                    return Err(Self::corrupted(
                        page_id,
                        "internal size exceeds page capacity",
                    ));
                }
                let mut internal = InternalNode::new(page_id, parent_page_id, max_size);
                for _ in 0..size {
                    let key = K::read_from(&mut buf);
                    let child = PageId::new(buf.get_i32_le());
                    internal.entries.push((key, child));
                }
                Ok(BPlusTreePage::Internal(internal))
            }
            other => Err(StorageError::IndexCorrupted(format!(
                "unknown page type {} at offset {} of {}",
                other, PAGE_TYPE_OFFSET, page_id
            ))),
        }
    }

    pub fn to_bytes(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);
        let mut buf = data;
        match self {
            BPlusTreePage::Leaf(leaf) => {
                buf.put_u32_le(LEAF_PAGE_TYPE);
                buf.put_u32_le(leaf.size() as u32);
                buf.put_u32_le(leaf.max_size as u32);
                buf.put_i32_le(leaf.parent_page_id.as_i32());
                buf.put_i32_le(leaf.page_id.as_i32());
                buf.put_i32_le(leaf.next_page_id.as_i32());
                for (key, value) in &leaf.entries {
                    key.write_to(&mut buf);
                    value.write_to(&mut buf);
                }
            }
            BPlusTreePage::Internal(internal) => {
                buf.put_u32_le(INTERNAL_PAGE_TYPE);
                buf.put_u32_le(internal.size() as u32);
                buf.put_u32_le(internal.max_size as u32);
                buf.put_i32_le(internal.parent_page_id.as_i32());
                buf.put_i32_le(internal.page_id.as_i32());
                for (key, child) in &internal.entries {
                    key.write_to(&mut buf);
                    buf.put_i32_le(child.as_i32());
                }
            }
        }
    }

    pub fn page_id(&self) -> PageId {
        match self {
            BPlusTreePage::Leaf(leaf) => leaf.page_id,
            BPlusTreePage::Internal(internal) => internal.page_id,
        }
    }

    pub fn parent_page_id(&self) -> PageId {
        match self {
            BPlusTreePage::Leaf(leaf) => leaf.parent_page_id,
            BPlusTreePage::Internal(internal) => internal.parent_page_id,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id() == INVALID_PAGE_ID
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, BPlusTreePage::Leaf(_))
    }

    pub fn size(&self) -> usize {
        match self {
            BPlusTreePage::Leaf(leaf) => leaf.size(),
            BPlusTreePage::Internal(internal) => internal.size(),
        }
    }

    pub fn max_size(&self) -> usize {
        match self {
            BPlusTreePage::Leaf(leaf) => leaf.max_size,
            BPlusTreePage::Internal(internal) => internal.max_size,
        }
    }

    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size())
    }

    fn corrupted(page_id: PageId, what: &str) -> StorageError {
        StorageError::IndexCorrupted(format!("{}: {}", page_id, what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RowId;
    use crate::index::BasicComparator;

    #[test]
    fn test_leaf_insert_sorted_and_unique() {
        let cmp = BasicComparator;
        let mut leaf: LeafNode<i32, i32> = LeafNode::new(PageId::new(3), INVALID_PAGE_ID, 4);

        assert!(leaf.insert(20, 2, &cmp));
        assert!(leaf.insert(10, 1, &cmp));
        assert!(leaf.insert(30, 3, &cmp));
        assert!(!leaf.insert(20, 99, &cmp));

        let keys: Vec<i32> = leaf.entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(leaf.lookup(&20, &cmp), Some(2));
        assert_eq!(leaf.lookup(&25, &cmp), None);
        assert_eq!(leaf.key_index(&25, &cmp), 2);

        assert!(leaf.remove(&10, &cmp));
        assert!(!leaf.remove(&10, &cmp));
        assert_eq!(leaf.size(), 2);
    }

    #[test]
    fn test_leaf_move_half() {
        let cmp = BasicComparator;
        let mut leaf: LeafNode<i32, i32> = LeafNode::new(PageId::new(1), INVALID_PAGE_ID, 4);
        for k in 1..=5 {
            leaf.insert(k, k, &cmp);
        }
        let mut right = LeafNode::new(PageId::new(2), INVALID_PAGE_ID, 4);
        leaf.move_half_to(&mut right);

        assert_eq!(leaf.size(), 3);
        assert_eq!(right.size(), 2);
        assert_eq!(*right.key_at(0), 4);
    }

    #[test]
    fn test_internal_lookup_routes_by_separator() {
        let cmp = BasicComparator;
        let mut node: InternalNode<i32> = InternalNode::new(PageId::new(9), INVALID_PAGE_ID, 4);
        node.populate_new_root(PageId::new(1), 10, PageId::new(2));
        node.insert_node_after(PageId::new(2), 20, PageId::new(3))
            .unwrap();

        assert_eq!(node.lookup(&5, &cmp), PageId::new(1));
        assert_eq!(node.lookup(&10, &cmp), PageId::new(2));
        assert_eq!(node.lookup(&19, &cmp), PageId::new(2));
        assert_eq!(node.lookup(&20, &cmp), PageId::new(3));
        assert_eq!(node.lookup(&1000, &cmp), PageId::new(3));

        assert!(node.insert_node_after(PageId::new(42), 30, PageId::new(4)).is_err());
    }

    #[test]
    fn test_page_codec() {
        let cmp = BasicComparator;
        let mut leaf: LeafNode<i32, RowId> = LeafNode::new(PageId::new(7), PageId::new(2), 8);
        leaf.next_page_id = PageId::new(8);
        for k in [5, 1, 3] {
            leaf.insert(k, RowId::new(PageId::new(k), k as u32), &cmp);
        }

        let mut data = [0u8; PAGE_SIZE];
        BPlusTreePage::Leaf(leaf).to_bytes(&mut data);
        write_parent_page_id(&mut data, PageId::new(11));

        match BPlusTreePage::<i32, RowId>::from_bytes(&data).unwrap() {
            BPlusTreePage::Leaf(decoded) => {
                assert_eq!(decoded.page_id, PageId::new(7));
                assert_eq!(decoded.parent_page_id, PageId::new(11));
                assert_eq!(decoded.next_page_id, PageId::new(8));
                assert_eq!(decoded.max_size, 8);
                assert_eq!(*decoded.key_at(0), 1);
                assert_eq!(decoded.entries[2].1, RowId::new(PageId::new(5), 5));
            }
            BPlusTreePage::Internal(_) => panic!("decoded a leaf as internal"),
        }
    }

    #[test]
    fn test_unknown_page_type_rejected() {
        let data = [0u8; PAGE_SIZE];
        assert!(matches!(
            BPlusTreePage::<i32, i32>::from_bytes(&data),
            Err(StorageError::IndexCorrupted(_))
        ));
    }

    #[test]
    fn test_page_capacity() {
        assert_eq!(leaf_page_capacity::<i32, RowId>(), (PAGE_SIZE - 24) / 12);
        assert_eq!(internal_page_capacity::<i64>(), (PAGE_SIZE - 20) / 12);
    }
}
