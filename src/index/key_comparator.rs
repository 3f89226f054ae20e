use std::cmp::Ordering;

use super::GenericKey;

/// Three-way ordering used by the B+Tree to place and find keys.
pub trait KeyComparator<K>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their natural `Ord`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicComparator;

impl<K: Ord> KeyComparator<K> for BasicComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Orders [`GenericKey`]s bytewise.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericComparator;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}
