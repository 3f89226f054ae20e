use std::fmt::Write as _;
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    IndexId, PageId, Result, StorageError, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{IndexRootsPage, IndexRootsPageRef};

use super::b_plus_tree_page::{
    internal_page_capacity, leaf_page_capacity, write_parent_page_id, BPlusTreePage,
    InternalNode, LeafNode,
};
use super::{IndexIterator, IndexKey, IndexValue, KeyComparator};

/// Which leaf a root-to-leaf descent should end at.
enum LeafTarget<'k, K> {
    Key(&'k K),
    Leftmost,
    Rightmost,
}

/// Disk-backed B+Tree with unique keys.
///
/// Every node lives in one buffer pool page. Nodes are decoded into memory,
/// changed, and encoded back; no page stays pinned between calls. The root
/// page id is recorded in the index roots page under `index_id`, so a tree
/// can be reopened from the same file.
///
/// Mutating operations take `&mut self`: one writer at a time.
pub struct BPlusTree<K, V, C> {
    index_id: IndexId,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Opens the tree recorded under `index_id`, or an empty one if none is
    /// recorded. `None` fan-outs fill a page.
    pub fn new(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        let leaf_capacity = leaf_page_capacity::<K, V>();
        let internal_capacity = internal_page_capacity::<K>();
        let leaf_max_size = leaf_max_size.unwrap_or(leaf_capacity);
        let internal_max_size = internal_max_size.unwrap_or(internal_capacity);

        if !(2..=leaf_capacity).contains(&leaf_max_size) {
            return Err(StorageError::InvalidConfig(format!(
                "leaf_max_size {} outside 2..={}",
                leaf_max_size, leaf_capacity
            )));
        }
        if !(3..=internal_capacity).contains(&internal_max_size) {
            return Err(StorageError::InvalidConfig(format!(
                "internal_max_size {} outside 3..={}",
                internal_max_size, internal_capacity
            )));
        }
        if bpm.is_page_free(INDEX_ROOTS_PAGE_ID) {
            return Err(StorageError::PageNotFound(INDEX_ROOTS_PAGE_ID));
        }

        let root_page_id = {
            let guard = bpm.fetch_page_read(INDEX_ROOTS_PAGE_ID)?;
            IndexRootsPageRef::new(guard.data())
                .get_root_id(index_id)
                .unwrap_or(INVALID_PAGE_ID)
        };
        debug!("index {} opened with root {}", index_id, root_page_id);

        Ok(Self {
            index_id,
            root_page_id,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: PhantomData,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub(crate) fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<V>> {
        if self.is_empty() {
            return Ok(None);
        }
        let leaf = self.find_leaf(LeafTarget::Key(key))?;
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Inserts a unique key. Returns `Ok(false)` if the key already exists.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value)
    }

    /// Removes `key`. Returns `Ok(false)` if it was absent.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let mut leaf = self.find_leaf(LeafTarget::Key(key))?;
        if !leaf.remove(key, &self.comparator) {
            return Ok(false);
        }
        self.coalesce_or_redistribute(BPlusTreePage::Leaf(leaf))?;
        Ok(true)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<'_, K, V, C>> {
        if self.is_empty() {
            return Ok(IndexIterator::empty(self));
        }
        let leaf = self.find_leaf(LeafTarget::Leftmost)?;
        IndexIterator::new(self, leaf.page_id, 0)
    }

    /// Iterator positioned at the first key not less than `key`.
    pub fn begin_from(&self, key: &K) -> Result<IndexIterator<'_, K, V, C>> {
        if self.is_empty() {
            return Ok(IndexIterator::empty(self));
        }
        let leaf = self.find_leaf(LeafTarget::Key(key))?;
        let index = leaf.key_index(key, &self.comparator);
        IndexIterator::new(self, leaf.page_id, index)
    }

    /// Iterator positioned one past the largest key.
    pub fn end(&self) -> Result<IndexIterator<'_, K, V, C>> {
        if self.is_empty() {
            return Ok(IndexIterator::empty(self));
        }
        let leaf = self.find_leaf(LeafTarget::Rightmost)?;
        IndexIterator::new(self, leaf.page_id, leaf.size())
    }

    /// True when no buffer pool page is left pinned.
    pub fn check(&self) -> bool {
        self.bpm.check_all_unpinned()
    }

    /// Frees every page of the tree and drops its index roots entry.
    pub fn destroy(&mut self) -> Result<()> {
        if !self.is_empty() {
            let mut pages = Vec::new();
            self.collect_pages(self.root_page_id, &mut pages)?;
            for page_id in pages {
                self.delete_page(page_id)?;
            }
        }

        self.root_page_id = INVALID_PAGE_ID;
        let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        IndexRootsPage::new(guard.data_mut()).delete(self.index_id);
        debug!("index {} destroyed", self.index_id);
        Ok(())
    }

    fn start_new_tree(&mut self, key: K, value: V) -> Result<()> {
        let mut guard = self.allocate_page("start new tree")?;
        let page_id = guard.page_id();

        let mut leaf = LeafNode::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.entries.push((key, value));
        BPlusTreePage::Leaf(leaf).to_bytes(guard.data_mut());
        drop(guard);

        self.root_page_id = page_id;
        self.update_root_page_id(true)?;
        debug!("index {} started a new tree at {}", self.index_id, page_id);
        Ok(())
    }

    fn insert_into_leaf(&mut self, key: K, value: V) -> Result<bool> {
        let mut leaf = self.find_leaf(LeafTarget::Key(&key))?;
        if !leaf.insert(key, value, &self.comparator) {
            return Ok(false);
        }
        if leaf.size() <= leaf.max_size {
            self.write_node(&BPlusTreePage::Leaf(leaf))?;
            return Ok(true);
        }

        let mut guard = self.allocate_page("split leaf")?;
        let mut new_leaf = LeafNode::new(guard.page_id(), leaf.parent_page_id, leaf.max_size);
        leaf.move_half_to(&mut new_leaf);
        new_leaf.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_leaf.page_id;

        let separator = new_leaf.key_at(0).clone();
        let new_page_id = new_leaf.page_id;
        BPlusTreePage::Leaf(new_leaf).to_bytes(guard.data_mut());
        drop(guard);

        let (old_page_id, parent_page_id) = (leaf.page_id, leaf.parent_page_id);
        self.write_node(&BPlusTreePage::Leaf(leaf))?;
        self.insert_into_parent(old_page_id, parent_page_id, separator, new_page_id)?;
        Ok(true)
    }

    /// Links `new_page_id` into the parent of `old_page_id` right after it,
    /// splitting upwards while parents overflow.
    fn insert_into_parent(
        &mut self,
        old_page_id: PageId,
        parent_page_id: PageId,
        key: K,
        new_page_id: PageId,
    ) -> Result<()> {
        if parent_page_id == INVALID_PAGE_ID {
            let mut guard = self.allocate_page("grow root")?;
            let root_page_id = guard.page_id();
            let mut root = InternalNode::new(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(old_page_id, key, new_page_id);
            BPlusTreePage::<K, V>::Internal(root).to_bytes(guard.data_mut());
            drop(guard);

            self.set_parent(old_page_id, root_page_id)?;
            self.set_parent(new_page_id, root_page_id)?;
            self.root_page_id = root_page_id;
            self.update_root_page_id(false)?;
            debug!("index {} root split, new root {}", self.index_id, root_page_id);
            return Ok(());
        }

        let mut parent = self.read_internal(parent_page_id)?;
        parent.insert_node_after(old_page_id, key, new_page_id)?;
        if parent.size() <= parent.max_size {
            return self.write_node(&BPlusTreePage::Internal(parent));
        }

        let mut guard = self.allocate_page("split internal")?;
        let mut sibling = InternalNode::new(guard.page_id(), parent.parent_page_id, parent.max_size);
        parent.move_half_to(&mut sibling);

        let separator = sibling.key_at(0).clone();
        let sibling_page_id = sibling.page_id;
        let moved: Vec<PageId> = sibling.children().collect();
        BPlusTreePage::<K, V>::Internal(sibling).to_bytes(guard.data_mut());
        drop(guard);

        let (split_page_id, grandparent_page_id) = (parent.page_id, parent.parent_page_id);
        self.write_node(&BPlusTreePage::Internal(parent))?;
        for child in moved {
            self.set_parent(child, sibling_page_id)?;
        }
        self.insert_into_parent(split_page_id, grandparent_page_id, separator, sibling_page_id)
    }

    /// Restores the size bounds of `node` after a removal and writes it back.
    fn coalesce_or_redistribute(&mut self, node: BPlusTreePage<K, V>) -> Result<()> {
        if node.is_root() {
            return self.adjust_root(node);
        }
        if node.size() >= node.min_size() {
            return self.write_node(&node);
        }

        let mut parent = self.read_internal(node.parent_page_id())?;
        if parent.size() < 2 {
            return Err(StorageError::IndexCorrupted(format!(
                "{} has a single child",
                parent.page_id
            )));
        }
        let index = parent.value_index(node.page_id()).ok_or_else(|| {
            StorageError::IndexCorrupted(format!(
                "{} is not a child of {}",
                node.page_id(),
                parent.page_id
            ))
        })?;
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        let sibling = self.read_node(parent.value_at(sibling_index))?;

        if sibling.size() + node.size() > node.max_size() {
            self.redistribute(sibling, node, &mut parent, index)?;
            return self.write_node(&BPlusTreePage::Internal(parent));
        }

        let (left, right, right_index) = if index == 0 {
            (node, sibling, 1)
        } else {
            (sibling, node, index)
        };
        self.coalesce(left, right, &mut parent, right_index)?;
        self.coalesce_or_redistribute(BPlusTreePage::Internal(parent))
    }

    /// Merges `right` into `left` and removes `right` from the parent.
    fn coalesce(
        &mut self,
        left: BPlusTreePage<K, V>,
        right: BPlusTreePage<K, V>,
        parent: &mut InternalNode<K>,
        right_index: usize,
    ) -> Result<()> {
        let right_page_id = right.page_id();
        match (left, right) {
            (BPlusTreePage::Leaf(mut left), BPlusTreePage::Leaf(right)) => {
                left.entries.extend(right.entries);
                left.next_page_id = right.next_page_id;
                self.write_node(&BPlusTreePage::Leaf(left))?;
            }
            (BPlusTreePage::Internal(mut left), BPlusTreePage::Internal(mut right)) => {
                let left_page_id = left.page_id;
                if !right.entries.is_empty() {
                    right.set_key_at(0, parent.key_at(right_index).clone());
                }
                let moved: Vec<PageId> = right.children().collect();
                left.entries.extend(right.entries);
                self.write_node(&BPlusTreePage::Internal(left))?;
                for child in moved {
                    self.set_parent(child, left_page_id)?;
                }
            }
            _ => {
                return Err(StorageError::IndexCorrupted(format!(
                    "siblings {} and {} differ in kind",
                    parent.value_at(right_index - 1),
                    right_page_id
                )))
            }
        }

        parent.remove(right_index);
        self.delete_page(right_page_id)
    }

    /// Moves one entry from `sibling` into `node`. `index` is the position of
    /// `node` in `parent`; at 0 the sibling is its right neighbour.
    fn redistribute(
        &mut self,
        sibling: BPlusTreePage<K, V>,
        node: BPlusTreePage<K, V>,
        parent: &mut InternalNode<K>,
        index: usize,
    ) -> Result<()> {
        let empty_sibling = || StorageError::IndexCorrupted("redistribute from empty sibling".into());

        match (sibling, node) {
            (BPlusTreePage::Leaf(mut sibling), BPlusTreePage::Leaf(mut node)) => {
                if index == 0 {
                    if sibling.entries.len() < 2 {
                        return Err(empty_sibling());
                    }
                    let first = sibling.entries.remove(0);
                    node.entries.push(first);
                    parent.set_key_at(1, sibling.key_at(0).clone());
                } else {
                    let last = sibling.entries.pop().ok_or_else(empty_sibling)?;
                    parent.set_key_at(index, last.0.clone());
                    node.entries.insert(0, last);
                }
                self.write_node(&BPlusTreePage::Leaf(sibling))?;
                self.write_node(&BPlusTreePage::Leaf(node))?;
            }
            (BPlusTreePage::Internal(mut sibling), BPlusTreePage::Internal(mut node)) => {
                let node_page_id = node.page_id;
                let moved_child = if index == 0 {
                    if sibling.entries.len() < 2 {
                        return Err(empty_sibling());
                    }
                    let middle = parent.key_at(1).clone();
                    let (_, child) = sibling.entries.remove(0);
                    node.entries.push((middle, child));
                    parent.set_key_at(1, sibling.key_at(0).clone());
                    child
                } else {
                    let (last_key, child) = sibling.entries.pop().ok_or_else(empty_sibling)?;
                    let middle = parent.key_at(index).clone();
                    if let Some(first) = node.entries.first_mut() {
                        first.0 = middle;
                    }
                    node.entries.insert(0, (last_key.clone(), child));
                    parent.set_key_at(index, last_key);
                    child
                };
                self.write_node(&BPlusTreePage::Internal(sibling))?;
                self.write_node(&BPlusTreePage::Internal(node))?;
                self.set_parent(moved_child, node_page_id)?;
            }
            (_, node) => {
                return Err(StorageError::IndexCorrupted(format!(
                    "sibling of {} differs in kind",
                    node.page_id()
                )))
            }
        }
        Ok(())
    }

    /// Shrinks the tree at the root: an empty root leaf empties the tree and
    /// an internal root with one child hands the root to that child.
    fn adjust_root(&mut self, root: BPlusTreePage<K, V>) -> Result<()> {
        match root {
            BPlusTreePage::Leaf(leaf) if leaf.size() == 0 => {
                self.delete_page(leaf.page_id)?;
                self.root_page_id = INVALID_PAGE_ID;
                self.update_root_page_id(false)?;
                debug!("index {} is now empty", self.index_id);
                Ok(())
            }
            BPlusTreePage::Internal(internal) if internal.size() == 1 => {
                let child = internal.value_at(0);
                self.delete_page(internal.page_id)?;
                self.set_parent(child, INVALID_PAGE_ID)?;
                self.root_page_id = child;
                self.update_root_page_id(false)?;
                debug!("index {} root collapsed into {}", self.index_id, child);
                Ok(())
            }
            other => self.write_node(&other),
        }
    }

    fn find_leaf(&self, target: LeafTarget<'_, K>) -> Result<LeafNode<K, V>> {
        let mut page_id = self.root_page_id;
        loop {
            match self.read_node(page_id)? {
                BPlusTreePage::Leaf(leaf) => return Ok(leaf),
                BPlusTreePage::Internal(internal) => {
                    if internal.size() == 0 {
                        return Err(StorageError::IndexCorrupted(format!(
                            "internal {} has no children",
                            page_id
                        )));
                    }
                    page_id = match &target {
                        LeafTarget::Key(key) => internal.lookup(key, &self.comparator),
                        LeafTarget::Leftmost => internal.value_at(0),
                        LeafTarget::Rightmost => internal.value_at(internal.size() - 1),
                    };
                }
            }
        }
    }

    fn read_node(&self, page_id: PageId) -> Result<BPlusTreePage<K, V>> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        BPlusTreePage::from_bytes(guard.data())
    }

    fn read_internal(&self, page_id: PageId) -> Result<InternalNode<K>> {
        match self.read_node(page_id)? {
            BPlusTreePage::Internal(internal) => Ok(internal),
            BPlusTreePage::Leaf(_) => Err(StorageError::IndexCorrupted(format!(
                "{} should be an internal page",
                page_id
            ))),
        }
    }

    fn write_node(&self, node: &BPlusTreePage<K, V>) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(node.page_id())?;
        node.to_bytes(guard.data_mut());
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(page_id)?;
        write_parent_page_id(guard.data_mut(), parent_page_id);
        Ok(())
    }

    fn allocate_page(&self, purpose: &'static str) -> Result<WritePageGuard> {
        self.bpm.new_page().map_err(|e| match e {
            StorageError::BufferPoolFull | StorageError::OutOfSpace => {
                StorageError::OutOfMemory(purpose)
            }
            other => other,
        })
    }

    /// Frees a tree page. The pool only frees resident pages, so the page is
    /// brought in first.
    fn delete_page(&self, page_id: PageId) -> Result<()> {
        drop(self.bpm.fetch_page_read(page_id)?);
        if !self.bpm.delete_page(page_id)? {
            return Err(StorageError::IndexCorrupted(format!(
                "{} is still pinned and cannot be freed",
                page_id
            )));
        }
        Ok(())
    }

    /// Writes the current root through to the index roots page.
    fn update_root_page_id(&self, insert_record: bool) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::new(guard.data_mut());
        let recorded = if insert_record {
            roots.insert(self.index_id, self.root_page_id)
                || roots.update(self.index_id, self.root_page_id)
        } else {
            roots.update(self.index_id, self.root_page_id)
                || roots.insert(self.index_id, self.root_page_id)
        };
        if !recorded {
            return Err(StorageError::IndexRootsFull);
        }
        Ok(())
    }

    fn collect_pages(&self, page_id: PageId, pages: &mut Vec<PageId>) -> Result<()> {
        if let BPlusTreePage::Internal(internal) = self.read_node(page_id)? {
            for child in internal.children() {
                self.collect_pages(child, pages)?;
            }
        }
        pages.push(page_id);
        Ok(())
    }

    /// Checks the structural invariants: parent links, size bounds, key
    /// order within and across nodes, uniform leaf depth and a leaf chain
    /// that visits every leaf once from left to right.
    pub fn verify(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.verify_node(
            self.root_page_id,
            INVALID_PAGE_ID,
            None,
            None,
            0,
            &mut leaf_depth,
            &mut leaves,
        )?;

        let mut page_id = self.find_leaf(LeafTarget::Leftmost)?.page_id;
        let mut previous_key: Option<K> = None;
        for &expected in &leaves {
            if page_id != expected {
                return Err(StorageError::IndexCorrupted(format!(
                    "leaf chain reached {} where {} was expected",
                    page_id, expected
                )));
            }
            let leaf = match self.read_node(page_id)? {
                BPlusTreePage::Leaf(leaf) => leaf,
                BPlusTreePage::Internal(_) => {
                    return Err(StorageError::IndexCorrupted(format!(
                        "leaf chain entered internal {}",
                        page_id
                    )))
                }
            };
            if let (Some(previous), Some((first, _))) = (&previous_key, leaf.entries.first()) {
                if self.comparator.compare(previous, first) != std::cmp::Ordering::Less {
                    return Err(StorageError::IndexCorrupted(format!(
                        "{} starts below its left neighbour",
                        page_id
                    )));
                }
            }
            previous_key = leaf.entries.last().map(|(k, _)| k.clone());
            page_id = leaf.next_page_id;
        }
        if page_id != INVALID_PAGE_ID {
            return Err(StorageError::IndexCorrupted(format!(
                "leaf chain continues past the last leaf into {}",
                page_id
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        use std::cmp::Ordering;

        let corrupted = |what: String| StorageError::IndexCorrupted(format!("{}: {}", page_id, what));
        let in_range = |key: &K| {
            lower.map_or(true, |lo| self.comparator.compare(lo, key) != Ordering::Greater)
                && upper.map_or(true, |hi| self.comparator.compare(key, hi) == Ordering::Less)
        };

        let node = self.read_node(page_id)?;
        if node.page_id() != page_id {
            return Err(corrupted(format!("header names {}", node.page_id())));
        }
        if node.parent_page_id() != expected_parent {
            return Err(corrupted(format!(
                "parent is {}, expected {}",
                node.parent_page_id(),
                expected_parent
            )));
        }
        let is_root = expected_parent == INVALID_PAGE_ID;
        if node.size() > node.max_size() || (!is_root && node.size() < node.min_size()) {
            return Err(corrupted(format!(
                "size {} outside [{}, {}]",
                node.size(),
                node.min_size(),
                node.max_size()
            )));
        }

        match node {
            BPlusTreePage::Leaf(leaf) => {
                for pair in leaf.entries.windows(2) {
                    if self.comparator.compare(&pair[0].0, &pair[1].0) != Ordering::Less {
                        return Err(corrupted("keys out of order".into()));
                    }
                }
                if !leaf.entries.iter().all(|(k, _)| in_range(k)) {
                    return Err(corrupted("key outside the parent's separators".into()));
                }
                match *leaf_depth {
                    Some(d) if d != depth => {
                        return Err(corrupted(format!("leaf at depth {}, expected {}", depth, d)))
                    }
                    _ => *leaf_depth = Some(depth),
                }
                leaves.push(page_id);
            }
            BPlusTreePage::Internal(internal) => {
                if internal.size() < 2 {
                    return Err(corrupted("internal node with fewer than two children".into()));
                }
                for i in 1..internal.size() {
                    if !in_range(internal.key_at(i)) {
                        return Err(corrupted("separator outside the parent's range".into()));
                    }
                    if i > 1
                        && self
                            .comparator
                            .compare(internal.key_at(i - 1), internal.key_at(i))
                            != Ordering::Less
                    {
                        return Err(corrupted("separators out of order".into()));
                    }
                }
                for i in 0..internal.size() {
                    let child_lower = if i == 0 { lower } else { Some(internal.key_at(i)) };
                    let child_upper = if i + 1 < internal.size() {
                        Some(internal.key_at(i + 1))
                    } else {
                        upper
                    };
                    self.verify_node(
                        internal.value_at(i),
                        page_id,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaf_depth,
                        leaves,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Renders the tree in Graphviz dot syntax.
    pub fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph G {\n  node [shape=record];\n");
        if !self.is_empty() {
            self.dot_node(self.root_page_id, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn dot_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        match self.read_node(page_id)? {
            BPlusTreePage::Leaf(leaf) => {
                let keys: Vec<String> = leaf.entries.iter().map(|(k, _)| format!("{:?}", k)).collect();
                let _ = writeln!(
                    out,
                    "  page_{} [color=green label=\"P={} | {}\"];",
                    page_id.as_i32(),
                    page_id.as_i32(),
                    keys.join(" ")
                );
                if leaf.next_page_id != INVALID_PAGE_ID {
                    let _ = writeln!(
                        out,
                        "  page_{} -> page_{} [style=dashed];",
                        page_id.as_i32(),
                        leaf.next_page_id.as_i32()
                    );
                }
            }
            BPlusTreePage::Internal(internal) => {
                let keys: Vec<String> = internal.entries[1..]
                    .iter()
                    .map(|(k, _)| format!("{:?}", k))
                    .collect();
                let _ = writeln!(
                    out,
                    "  page_{} [color=pink label=\"P={} | {}\"];",
                    page_id.as_i32(),
                    page_id.as_i32(),
                    keys.join(" ")
                );
                for child in internal.children() {
                    let _ = writeln!(out, "  page_{} -> page_{};", page_id.as_i32(), child.as_i32());
                    self.dot_node(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Indented text listing of every node, for debugging.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("(empty)\n");
        } else {
            self.dump_node(self.root_page_id, 0, &mut out)?;
        }
        Ok(out)
    }

    fn dump_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let indent = "  ".repeat(depth);
        match self.read_node(page_id)? {
            BPlusTreePage::Leaf(leaf) => {
                let _ = write!(
                    out,
                    "{}Leaf {} parent={} next={}:",
                    indent, page_id, leaf.parent_page_id, leaf.next_page_id
                );
                for (key, value) in &leaf.entries {
                    let _ = write!(out, " {:?}=>{:?}", key, value);
                }
                out.push('\n');
            }
            BPlusTreePage::Internal(internal) => {
                let _ = write!(
                    out,
                    "{}Internal {} parent={}:",
                    indent, page_id, internal.parent_page_id
                );
                for (key, _) in &internal.entries[1..] {
                    let _ = write!(out, " {:?}", key);
                }
                out.push('\n');
                for child in internal.children() {
                    self.dump_node(child, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EngineConfig;
    use crate::index::BasicComparator;
    use crate::storage::StorageEngine;
    use tempfile::NamedTempFile;

    fn open_tree(
        engine: &StorageEngine,
        leaf_max: usize,
        internal_max: usize,
    ) -> BPlusTree<i32, i32, BasicComparator> {
        BPlusTree::new(
            0,
            Arc::clone(engine.bpm()),
            BasicComparator,
            Some(leaf_max),
            Some(internal_max),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup_small() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();
        let mut tree = open_tree(&engine, 4, 4);

        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1).unwrap(), None);

        for k in [5, 3, 8, 1, 9, 7, 2] {
            assert!(tree.insert(k, k * 10).unwrap());
        }
        assert!(!tree.insert(5, 0).unwrap());

        for k in [5, 3, 8, 1, 9, 7, 2] {
            assert_eq!(tree.get_value(&k).unwrap(), Some(k * 10));
        }
        assert_eq!(tree.get_value(&4).unwrap(), None);
        tree.verify().unwrap();
        assert!(tree.check());
    }

    #[test]
    fn test_root_split_and_collapse() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();
        let mut tree = open_tree(&engine, 3, 3);

        for k in 1..=4 {
            tree.insert(k, k).unwrap();
        }
        let split_root = tree.root_page_id();
        assert!(tree.dump().unwrap().starts_with("Internal"));

        for k in 1..=4 {
            assert!(tree.remove(&k).unwrap());
            tree.verify().unwrap();
        }
        assert!(tree.is_empty());
        assert!(engine.bpm().is_page_free(split_root));
        assert!(!tree.remove(&1).unwrap());
        assert!(tree.check());
    }

    #[test]
    fn test_to_dot_lists_every_node() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();
        let mut tree = open_tree(&engine, 2, 3);

        for k in 0..6 {
            tree.insert(k, k).unwrap();
        }
        let dot = tree.to_dot().unwrap();
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains(&format!("page_{} ", tree.root_page_id().as_i32())));
        assert!(dot.contains("style=dashed"));
    }

    #[test]
    fn test_invalid_fanout_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();

        let result = BPlusTree::<i32, i32, _>::new(0, Arc::clone(engine.bpm()), BasicComparator, Some(1), None);
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));

        let result = BPlusTree::<i32, i32, _>::new(0, Arc::clone(engine.bpm()), BasicComparator, None, Some(100_000));
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn test_destroy_frees_pages() {
        let temp_file = NamedTempFile::new().unwrap();
        let engine = StorageEngine::open(temp_file.path(), EngineConfig::default()).unwrap();
        let mut tree = open_tree(&engine, 4, 4);

        for k in 0..50 {
            tree.insert(k, k).unwrap();
        }
        let allocated_before = engine.disk_manager().num_allocated_pages();
        assert!(allocated_before > 2);

        tree.destroy().unwrap();
        assert!(tree.is_empty());
        // Only the two reserved pages remain
        assert_eq!(engine.disk_manager().num_allocated_pages(), 2);

        let reopened = open_tree(&engine, 4, 4);
        assert!(reopened.is_empty());
    }
}
