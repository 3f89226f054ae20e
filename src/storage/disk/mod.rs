mod bitmap_page;
mod disk_manager;
mod disk_scheduler;

pub use bitmap_page::*;
pub use disk_manager::*;
pub use disk_scheduler::*;
