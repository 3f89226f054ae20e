use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Disk is full, no free page left to allocate")]
    OutOfSpace,

    #[error("Out of memory: {0}")]
    OutOfMemory(&'static str),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Index roots page is full")]
    IndexRootsFull,

    #[error("Key of {len} bytes does not fit a {width}-byte index key")]
    KeyTooLong { len: usize, width: usize },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
