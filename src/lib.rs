//! MiniSQL storage - the disk-oriented half of a small relational database
//!
//! This crate provides the layers a query engine sits on: a paged database
//! file with its own allocator, a buffer pool caching those pages in memory,
//! and a disk-backed B+Tree index over them.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): The database file and its page formats
//!   - `DiskManager`: Logical page ids over extents tracked by bitmap pages
//!   - `DiskScheduler`: Background worker serving page reads and writes
//!   - `IndexRootsPage`: Page 1, mapping each index to its root page
//!   - `StorageEngine`: Opens a database file and wires the layers together
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in memory
//!   - `LruReplacer`: Least-recently-unpinned frame replacement
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that unpin on drop
//!
//! - **Index** (`index`): Disk-backed B+Tree
//!   - `BPlusTree`: Unique-key tree over fixed-width keys and values
//!   - `IndexIterator`: Ordered scan along the leaf chain
//!   - `BPlusTreeIndex`: Byte-keyed index over row ids
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minisql::common::EngineConfig;
//! use minisql::index::{BPlusTree, BasicComparator};
//! use minisql::storage::StorageEngine;
//!
//! let engine = StorageEngine::open("test.db", EngineConfig::default()).unwrap();
//!
//! let mut tree: BPlusTree<i32, i32, _> =
//!     BPlusTree::new(0, Arc::clone(engine.bpm()), BasicComparator, None, None).unwrap();
//! tree.insert(42, 7).unwrap();
//! assert_eq!(tree.get_value(&42).unwrap(), Some(7));
//!
//! engine.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{EngineConfig, PageId, Result, RowId, StorageError};
pub use storage::StorageEngine;
