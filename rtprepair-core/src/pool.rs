//! Fixed-capacity node pool
//!
//! Supplies storage for tree nodes. The pool never grows: once every slot is
//! handed out, `acquire` fails until a node is released. Both acquire and
//! release are O(1) through a free-slot stack.

use crate::rbtree::{NodeId, NodeStore};
use serde::Serialize;
use tracing::{trace, warn};

/// Usage counters for a [`NodePool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub outstanding: usize,
    /// Largest number of nodes held at once
    pub high_water: usize,
    /// Acquire calls that found the pool exhausted
    pub alloc_failures: u64,
}

pub struct NodePool<T> {
    slots: Vec<Option<T>>,
    free: Vec<NodeId>,
    high_water: usize,
    alloc_failures: u64,
}

impl<T> NodePool<T> {
    /// Create a pool with room for `capacity` nodes (at most `u32::MAX`).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        Self {
            slots,
            // Reversed so low slots are handed out first.
            free: (0..capacity).rev().map(NodeId::new).collect(),
            high_water: 0,
            alloc_failures: 0,
        }
    }

    /// Take a free slot and initialise it with `value`.
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn acquire(&mut self, value: T) -> Option<NodeId> {
        let Some(id) = self.free.pop() else {
            self.alloc_failures += 1;
            warn!(capacity = self.capacity(), "node pool exhausted");
            return None;
        };
        self.slots[id.index()] = Some(value);
        self.high_water = self.high_water.max(self.outstanding());
        trace!(%id, "node acquired");
        Some(id)
    }

    /// Return a node to the pool, handing back its value.
    ///
    /// Releasing a slot that is not allocated is ignored.
    pub fn release(&mut self, id: NodeId) -> Option<T> {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            warn!(%id, "release of a handle outside the pool");
            return None;
        };
        let Some(value) = slot.take() else {
            warn!(%id, "double release of pool node");
            return None;
        };
        self.free.push(id);
        trace!(%id, "node released");
        Some(value)
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Nodes currently handed out
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            outstanding: self.outstanding(),
            high_water: self.high_water,
            alloc_failures: self.alloc_failures,
        }
    }
}

impl<T> NodeStore<T> for NodePool<T> {
    fn node(&self, id: NodeId) -> &T {
        match self.get(id) {
            Some(node) => node,
            None => panic!("pool node {id} is not allocated"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut T {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("pool node {id} is not allocated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = NodePool::new(3);
        let a = pool.acquire(1u32).unwrap();
        let b = pool.acquire(2).unwrap();
        let c = pool.acquire(3).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.outstanding(), 3);
        assert_eq!(pool.available(), 0);
        assert!(pool.acquire(4).is_none());
        assert_eq!(pool.stats().alloc_failures, 1);
    }

    #[test]
    fn test_release_recycles_slot() {
        let mut pool = NodePool::new(1);
        let a = pool.acquire("first").unwrap();
        assert_eq!(pool.release(a), Some("first"));
        assert_eq!(pool.outstanding(), 0);
        let b = pool.acquire("second").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.get(b), Some(&"second"));
    }

    #[test]
    fn test_double_release_ignored() {
        let mut pool = NodePool::new(2);
        let a = pool.acquire(7u8).unwrap();
        assert_eq!(pool.release(a), Some(7));
        assert_eq!(pool.release(a), None);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.release(NodeId::new(99)), None);
    }

    #[test]
    fn test_high_water_mark() {
        let mut pool = NodePool::new(4);
        let ids: Vec<_> = (0..3).map(|v| pool.acquire(v).unwrap()).collect();
        for id in ids {
            pool.release(id);
        }
        pool.acquire(9).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.high_water, 3);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.capacity, 4);
    }

    #[test]
    fn test_zero_capacity() {
        let mut pool: NodePool<u8> = NodePool::new(0);
        assert!(pool.acquire(1).is_none());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_store_access_to_free_slot_panics() {
        let pool: NodePool<u8> = NodePool::new(1);
        let _ = pool.node(NodeId::new(0));
    }
}
