//! Bounded, insertion-ordered cache of offscreen render targets keyed by
//! `(width, height)` (§3, §5). A plain data structure: it knows nothing
//! about the GPU context, so eviction hands the displaced entry back to
//! the caller to free.

use std::collections::VecDeque;

use super::gl::RenderTarget;

/// Default capacity before the oldest entry is evicted.
pub const DEFAULT_CAPACITY: usize = 30;

pub struct ResourcePool {
    capacity: usize,
    entries: VecDeque<RenderTarget>,
}

impl ResourcePool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Takes a same-sized entry out of the pool, if one exists.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<RenderTarget> {
        let idx = self
            .entries
            .iter()
            .position(|t| t.width == width && t.height == height)?;
        self.entries.remove(idx)
    }

    /// Returns a target to the pool. If this pushes the pool over
    /// capacity, the oldest entry (not the most recently used) is evicted
    /// and handed back for the caller to free (§5).
    #[must_use]
    pub fn recycle(&mut self, target: RenderTarget) -> Option<RenderTarget> {
        self.entries.push_back(target);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: u64, w: u32, h: u32) -> RenderTarget {
        RenderTarget {
            width: w,
            height: h,
            fbo_id: id,
            texture_id: id,
        }
    }

    #[test]
    fn acquire_returns_none_when_empty() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.acquire(100, 100).is_none());
    }

    #[test]
    fn recycle_then_acquire_round_trips() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.recycle(target(1, 100, 100)).is_none());
        let got = pool.acquire(100, 100).unwrap();
        assert_eq!(got.fbo_id, 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_not_newest() {
        let mut pool = ResourcePool::new(2);
        assert!(pool.recycle(target(1, 10, 10)).is_none());
        assert!(pool.recycle(target(2, 20, 20)).is_none());
        let evicted = pool.recycle(target(3, 30, 30)).unwrap();
        assert_eq!(evicted.fbo_id, 1);
        assert_eq!(pool.len(), 2);
    }
}
