use hashlink::LinkedHashSet;
use parking_lot::Mutex;

use crate::common::FrameId;

/// Eviction policy over buffer pool frames. Only frames handed over through
/// `unpin` are candidates; the policy never sees page contents.
pub trait Replacer: Send + Sync {
    /// Removes and returns the frame to evict, if any.
    fn victim(&self) -> Option<FrameId>;

    /// Stops tracking `frame_id`. No-op when it is not tracked.
    fn pin(&self, frame_id: FrameId);

    /// Starts tracking `frame_id` as evictable. No-op when already tracked.
    fn unpin(&self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU replacement policy.
///
/// Frames are kept in unpin order: the front of the set is the least
/// recently unpinned frame and is the next victim. The set never holds more
/// than `capacity` frames; unpinning into a full set drops the oldest entry.
pub struct LruReplacer {
    capacity: usize,
    lru_list: Mutex<LinkedHashSet<FrameId>>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lru_list: Mutex::new(LinkedHashSet::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        self.lru_list.lock().pop_front()
    }

    fn pin(&self, frame_id: FrameId) {
        self.lru_list.lock().remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut lru_list = self.lru_list.lock();
        if lru_list.contains(&frame_id) {
            return;
        }
        if lru_list.len() >= self.capacity {
            lru_list.pop_front();
        }
        if self.capacity > 0 {
            lru_list.insert(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.lru_list.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_victim_order() {
        let replacer = LruReplacer::new(7);

        for i in 1..=6 {
            replacer.unpin(FrameId::new(i));
        }
        // Unpinning a tracked frame does not refresh it
        replacer.unpin(FrameId::new(1));
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));

        replacer.pin(FrameId::new(3));
        replacer.pin(FrameId::new(4));
        assert_eq!(replacer.size(), 2);

        replacer.unpin(FrameId::new(4));
        assert_eq!(replacer.victim(), Some(FrameId::new(5)));
        assert_eq!(replacer.victim(), Some(FrameId::new(6)));
        assert_eq!(replacer.victim(), Some(FrameId::new(4)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_capacity() {
        let replacer = LruReplacer::new(2);

        replacer.unpin(FrameId::new(0));
        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    }
}
