pub mod disk;
pub mod page;
mod storage_engine;

pub use storage_engine::*;
