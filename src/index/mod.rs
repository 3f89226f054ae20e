mod b_plus_tree;
mod b_plus_tree_index;
mod b_plus_tree_page;
mod generic_key;
mod index_iterator;
mod key_comparator;

pub use b_plus_tree::*;
pub use b_plus_tree_index::*;
pub use b_plus_tree_page::*;
pub use generic_key::*;
pub use index_iterator::*;
pub use key_comparator::*;
