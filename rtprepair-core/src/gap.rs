//! Gap set: missing sequence-number ranges
//!
//! A [`GapSet`] records which ranges of the cyclic 32-bit sequence space are
//! believed missing from a received stream. Gaps are inclusive ranges
//! `[start_seq, start_seq + extent]`, stored in a red-black tree keyed by
//! `start_seq` under the cyclic comparator.
//!
//! ## Invariants
//!
//! - Stored gaps never share a sequence number. Touching gaps are allowed
//!   and are not merged.
//! - `extent` never exceeds [`MAX_GAP_EXTENT`].
//! - No stored gap crosses the top of the sequence space; a request that
//!   would is split in two before storage.
//!
//! Nodes come from a caller-owned [`GapPool`]. The same pool must be passed
//! to every call on a given set.

use crate::pool::NodePool;
use crate::rbtree::{Links, RbTree, TreeNode};
use crate::seq::{seq_ge, seq_gt, seq_le, seq_lt, SeqNum, SeqOrder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Largest extent a single gap may carry (32768 sequence numbers)
pub const MAX_GAP_EXTENT: u16 = 32767;

/// Inclusive range of missing sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gap {
    pub start_seq: SeqNum,
    /// Sequence numbers covered beyond `start_seq`
    pub extent: u16,
}

impl Gap {
    #[must_use]
    pub const fn new(start_seq: SeqNum, extent: u16) -> Self {
        Self { start_seq, extent }
    }

    /// Gap covering one sequence number
    #[must_use]
    pub const fn single(seq: SeqNum) -> Self {
        Self::new(seq, 0)
    }

    /// Last sequence number covered (wrapping)
    #[must_use]
    pub const fn end_seq(&self) -> SeqNum {
        self.start_seq.wrapping_add(self.extent as u32)
    }

    /// Number of sequence numbers covered
    #[must_use]
    pub const fn seq_count(&self) -> u32 {
        self.extent as u32 + 1
    }

    #[must_use]
    pub const fn contains(&self, seq: SeqNum) -> bool {
        seq.wrapping_sub(self.start_seq) <= self.extent as u32
    }

    /// Whether the range runs past `u32::MAX`
    #[must_use]
    pub const fn crosses_wrap(&self) -> bool {
        self.start_seq as u64 + self.extent as u64 > u32::MAX as u64
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_seq, self.end_seq())
    }
}

/// Tree element holding one gap
#[derive(Debug, Clone)]
pub struct GapNode {
    pub gap: Gap,
    links: Links,
}

impl GapNode {
    #[must_use]
    pub const fn new(gap: Gap) -> Self {
        Self {
            gap,
            links: Links::new(),
        }
    }
}

impl TreeNode for GapNode {
    type Key = SeqNum;

    fn key(&self) -> SeqNum {
        self.gap.start_seq
    }

    fn links(&self) -> &Links {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }
}

/// Node pool backing a [`GapSet`]
pub type GapPool = NodePool<GapNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GapError {
    #[error("invalid arguments")]
    InvalidArgs,

    #[error("gap node allocation failed")]
    AllocFailure,

    #[error("a gap with the same start already exists")]
    Duplicate,

    #[error("gap overlaps the gap below it")]
    OverlapBelow,

    #[error("gap overlaps the gap above it")]
    OverlapAbove,

    #[error("no gap covers the sequence number")]
    GapNotFound,

    #[error("gap set is empty")]
    TreeIsEmpty,

    #[error("gap set invariant violated")]
    Unknown,
}

impl GapError {
    /// Only an invariant violation is fatal; everything else is an expected rejection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Ordered set of disjoint missing ranges
#[derive(Debug, Default)]
pub struct GapSet {
    tree: RbTree<GapNode, SeqOrder>,
}

impl GapSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tree: RbTree::new(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Record `gap` as missing.
    ///
    /// A gap that runs past `u32::MAX` is stored as two gaps,
    /// `[start_seq, u32::MAX]` and `[0, rest]`. If the second half is
    /// rejected the first half is taken out again, so the set is unchanged
    /// on any error.
    pub fn add_gap(&mut self, pool: &mut GapPool, gap: Gap) -> Result<(), GapError> {
        if gap.extent > MAX_GAP_EXTENT {
            debug!(start = gap.start_seq, extent = gap.extent, "gap extent out of range");
            return Err(GapError::InvalidArgs);
        }

        if !gap.crosses_wrap() {
            return self.insert_gap(pool, gap);
        }

        let upper_extent =
            u16::try_from(u32::MAX - gap.start_seq).map_err(|_| GapError::InvalidArgs)?;
        let upper = Gap::new(gap.start_seq, upper_extent);
        let lower = Gap::new(0, gap.extent - upper_extent - 1);
        trace!(%gap, %upper, %lower, "splitting gap at sequence wrap");

        self.insert_gap(pool, upper)?;
        if let Err(e) = self.insert_gap(pool, lower) {
            self.discard(pool, upper.start_seq);
            return Err(e);
        }
        Ok(())
    }

    /// Mark `seq` as received, shrinking or splitting the gap that covers it.
    pub fn remove_seq_num(&mut self, pool: &mut GapPool, seq: SeqNum) -> Result<(), GapError> {
        let Some(id) = self.tree.find_le(pool, &seq) else {
            return Err(GapError::GapNotFound);
        };
        let found = pool.get(id).ok_or(GapError::Unknown)?.gap;
        if seq_gt(seq, found.end_seq()) {
            return Err(GapError::GapNotFound);
        }

        if seq == found.start_seq {
            if found.extent == 0 {
                self.tree.remove(pool, id).ok_or(GapError::Unknown)?;
                pool.release(id);
                trace!(seq, "gap closed");
            } else {
                // Still ordered: the next gap starts after the old end.
                let node = pool.get_mut(id).ok_or(GapError::Unknown)?;
                node.gap.start_seq = seq.wrapping_add(1);
                node.gap.extent -= 1;
                trace!(seq, gap = %node.gap, "gap head trimmed");
            }
            return Ok(());
        }

        let head_extent = extent_between(found.start_seq, seq)?;
        pool.get_mut(id).ok_or(GapError::Unknown)?.gap.extent = head_extent;

        if seq_lt(seq, found.end_seq()) {
            let tail_start = seq.wrapping_add(1);
            let tail = Gap::new(tail_start, extent_between(seq, found.end_seq())?);
            if let Err(e) = self.add_gap(pool, tail) {
                debug!(seq, error = %e, "failed to store gap tail, restoring");
                if let Some(node) = pool.get_mut(id) {
                    node.gap.extent = found.extent;
                }
                return Err(e);
            }
            trace!(seq, head = %Gap::new(found.start_seq, head_extent), %tail, "gap split");
        } else {
            trace!(seq, "gap tail trimmed");
        }
        Ok(())
    }

    /// Remove and return the lowest gap under the storage order.
    pub fn extract_min(&mut self, pool: &mut GapPool) -> Result<Gap, GapError> {
        let Some(id) = self.tree.min(pool) else {
            return Err(GapError::TreeIsEmpty);
        };
        self.tree.remove(pool, id).ok_or(GapError::Unknown)?;
        let node = pool.release(id).ok_or(GapError::Unknown)?;
        Ok(node.gap)
    }

    /// Lowest gap under the storage order, left in place
    #[must_use]
    pub fn first(&self, pool: &GapPool) -> Option<Gap> {
        self.tree
            .min(pool)
            .and_then(|id| pool.get(id))
            .map(|node| node.gap)
    }

    /// Whether some stored gap covers `seq`
    #[must_use]
    pub fn contains(&self, pool: &GapPool, seq: SeqNum) -> bool {
        self.tree
            .find_le(pool, &seq)
            .and_then(|id| pool.get(id))
            .is_some_and(|node| node.gap.contains(seq))
    }

    /// Ascending copies of the stored gaps
    pub fn iter<'a>(&'a self, pool: &'a GapPool) -> impl Iterator<Item = Gap> + 'a {
        self.tree
            .iter(pool)
            .filter_map(move |id| pool.get(id).map(|node| node.gap))
    }

    /// Number of stored gaps. O(n).
    #[must_use]
    pub fn len(&self, pool: &GapPool) -> usize {
        self.tree.len(pool)
    }

    /// Total sequence numbers covered by all gaps. O(n).
    #[must_use]
    pub fn missing_count(&self, pool: &GapPool) -> u64 {
        self.iter(pool).map(|g| u64::from(g.seq_count())).sum()
    }

    /// Release every stored gap back to the pool, returning how many there were.
    pub fn clear(&mut self, pool: &mut GapPool) -> usize {
        let mut n = 0;
        while self.extract_min(pool).is_ok() {
            n += 1;
        }
        n
    }

    /// Check tree structure and pairwise disjointness.
    pub fn validate(&self, pool: &GapPool) -> Result<(), GapError> {
        if let Err(e) = self.tree.validate(pool) {
            error!(error = %e, "gap tree corrupted");
            return Err(GapError::Unknown);
        }
        let mut prev: Option<Gap> = None;
        for gap in self.iter(pool) {
            if gap.extent > MAX_GAP_EXTENT || gap.crosses_wrap() {
                error!(%gap, "stored gap out of bounds");
                return Err(GapError::Unknown);
            }
            if let Some(p) = prev {
                if seq_ge(p.end_seq(), gap.start_seq) {
                    error!(prev = %p, %gap, "stored gaps overlap");
                    return Err(GapError::Unknown);
                }
            }
            prev = Some(gap);
        }
        Ok(())
    }

    /// Emit one line per gap in ascending order, flagging neighbours that
    /// are out of order or overlap.
    pub fn print<F: FnMut(&str)>(&self, pool: &GapPool, mut emit: F) {
        let mut prev: Option<Gap> = None;
        for gap in self.iter(pool) {
            emit(&format!("gap {gap} extent {}", gap.extent));
            if let Some(p) = prev {
                if !seq_lt(p.start_seq, gap.start_seq) {
                    emit(&format!("  error: {gap} is out of order after {p}"));
                } else if seq_ge(p.end_seq(), gap.start_seq) {
                    emit(&format!("  error: {gap} overlaps {p}"));
                }
            }
            prev = Some(gap);
        }
    }

    fn insert_gap(&mut self, pool: &mut GapPool, gap: Gap) -> Result<(), GapError> {
        let Some(id) = pool.acquire(GapNode::new(gap)) else {
            return Err(GapError::AllocFailure);
        };

        if let Err(e) = self.check_neighbours(pool, gap) {
            pool.release(id);
            debug!(%gap, error = %e, "gap rejected");
            return Err(e);
        }

        if let Some(existing) = self.tree.insert(pool, id) {
            pool.release(id);
            error!(%gap, %existing, "gap insert collided after neighbour checks");
            return Err(GapError::Unknown);
        }

        trace!(%gap, "gap added");
        Ok(())
    }

    fn check_neighbours(&self, pool: &GapPool, gap: Gap) -> Result<(), GapError> {
        if let Some(below) = self
            .tree
            .find_le(pool, &gap.start_seq)
            .and_then(|id| pool.get(id))
        {
            let below = below.gap;
            if below.start_seq == gap.start_seq {
                return Err(GapError::Duplicate);
            }
            if seq_le(gap.start_seq, below.end_seq()) {
                return Err(GapError::OverlapBelow);
            }
        }
        if let Some(above) = self
            .tree
            .find_ge(pool, &gap.start_seq)
            .and_then(|id| pool.get(id))
        {
            if seq_ge(gap.end_seq(), above.gap.start_seq) {
                return Err(GapError::OverlapAbove);
            }
        }
        Ok(())
    }

    /// Drop the gap starting exactly at `start`, if present.
    fn discard(&mut self, pool: &mut GapPool, start: SeqNum) {
        if let Some(id) = self.tree.find(pool, &start) {
            if self.tree.remove(pool, id).is_some() {
                pool.release(id);
            }
        }
    }
}

/// Extent of the range strictly between `from` and `to`
fn extent_between(from: SeqNum, to: SeqNum) -> Result<u16, GapError> {
    let span = to.wrapping_sub(from);
    if span == 0 {
        return Err(GapError::Unknown);
    }
    u16::try_from(span - 1).map_err(|_| GapError::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(set: &GapSet, pool: &GapPool) -> Vec<(u32, u16)> {
        set.iter(pool).map(|g| (g.start_seq, g.extent)).collect()
    }

    #[test]
    fn test_gap_helpers() {
        let g = Gap::new(10, 4);
        assert_eq!(g.end_seq(), 14);
        assert_eq!(g.seq_count(), 5);
        assert!(g.contains(10));
        assert!(g.contains(14));
        assert!(!g.contains(15));
        assert!(!g.contains(9));
        assert!(!g.crosses_wrap());
        assert!(Gap::new(u32::MAX, 1).crosses_wrap());
        assert!(!Gap::new(u32::MAX, 0).crosses_wrap());
        assert_eq!(g.to_string(), "[10, 14]");
    }

    #[test]
    fn test_add_and_extract_single() {
        let mut pool = GapPool::new(8);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(100, 7)).unwrap();
        assert!(!set.is_empty());
        assert_eq!(set.extract_min(&mut pool), Ok(Gap::new(100, 7)));
        assert!(set.is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_touching_gaps_not_merged() {
        let mut pool = GapPool::new(8);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(10, 4)).unwrap();
        set.add_gap(&mut pool, Gap::new(15, 0)).unwrap();
        set.add_gap(&mut pool, Gap::new(5, 4)).unwrap();
        assert_eq!(collect(&set, &pool), vec![(5, 4), (10, 4), (15, 0)]);
        set.validate(&pool).unwrap();
    }

    #[test]
    fn test_rejections_release_node() {
        let mut pool = GapPool::new(8);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(100, 10)).unwrap();
        let used = pool.outstanding();

        assert_eq!(set.add_gap(&mut pool, Gap::new(0, 40000)), Err(GapError::InvalidArgs));
        assert_eq!(set.add_gap(&mut pool, Gap::new(100, 0)), Err(GapError::Duplicate));
        assert_eq!(set.add_gap(&mut pool, Gap::new(110, 3)), Err(GapError::OverlapBelow));
        assert_eq!(set.add_gap(&mut pool, Gap::new(105, 0)), Err(GapError::OverlapBelow));
        assert_eq!(set.add_gap(&mut pool, Gap::new(90, 10)), Err(GapError::OverlapAbove));
        assert_eq!(set.add_gap(&mut pool, Gap::new(50, 200)), Err(GapError::OverlapAbove));

        assert_eq!(pool.outstanding(), used);
        assert_eq!(collect(&set, &pool), vec![(100, 10)]);
    }

    #[test]
    fn test_alloc_failure() {
        let mut pool = GapPool::new(1);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(1, 0)).unwrap();
        assert_eq!(set.add_gap(&mut pool, Gap::new(5, 0)), Err(GapError::AllocFailure));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut pool = GapPool::new(8);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(10, 9)).unwrap(); // 10..=19

        set.remove_seq_num(&mut pool, 10).unwrap();
        assert_eq!(collect(&set, &pool), vec![(11, 8)]);

        set.remove_seq_num(&mut pool, 19).unwrap();
        assert_eq!(collect(&set, &pool), vec![(11, 7)]);

        set.remove_seq_num(&mut pool, 14).unwrap();
        assert_eq!(collect(&set, &pool), vec![(11, 2), (15, 3)]);
        assert_eq!(pool.outstanding(), 2);

        assert_eq!(set.remove_seq_num(&mut pool, 14), Err(GapError::GapNotFound));
        assert_eq!(set.remove_seq_num(&mut pool, 9), Err(GapError::GapNotFound));
        assert_eq!(set.remove_seq_num(&mut pool, 30), Err(GapError::GapNotFound));
        set.validate(&pool).unwrap();
    }

    #[test]
    fn test_remove_last_seq_releases_node() {
        let mut pool = GapPool::new(2);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::single(42)).unwrap();
        set.remove_seq_num(&mut pool, 42).unwrap();
        assert!(set.is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_split_failure_restores_head() {
        let mut pool = GapPool::new(1);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(10, 9)).unwrap();
        assert_eq!(set.remove_seq_num(&mut pool, 15), Err(GapError::AllocFailure));
        assert_eq!(collect(&set, &pool), vec![(10, 9)]);
    }

    #[test]
    fn test_wrap_split_is_atomic() {
        // Room for the upper half only.
        let mut pool = GapPool::new(1);
        let mut set = GapSet::new();
        let gap = Gap::new(u32::MAX - 5, 9);
        assert_eq!(set.add_gap(&mut pool, gap), Err(GapError::AllocFailure));
        assert!(set.is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_wrap_split_rejected_by_overlap() {
        let mut pool = GapPool::new(8);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(2, 0)).unwrap();
        let gap = Gap::new(u32::MAX - 1, 5); // MAX-1 ..= 3
        assert_eq!(set.add_gap(&mut pool, gap), Err(GapError::OverlapAbove));
        assert_eq!(collect(&set, &pool), vec![(2, 0)]);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_max_extent_accepted() {
        let mut pool = GapPool::new(2);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(0, MAX_GAP_EXTENT)).unwrap();
        assert_eq!(set.missing_count(&pool), 32768);
        assert!(set.contains(&pool, 32767));
        assert!(!set.contains(&pool, 32768));
    }

    #[test]
    fn test_clear_releases_all() {
        let mut pool = GapPool::new(16);
        let mut set = GapSet::new();
        for i in 0..10 {
            set.add_gap(&mut pool, Gap::new(i * 10, 3)).unwrap();
        }
        assert_eq!(set.len(&pool), 10);
        assert_eq!(set.first(&pool), Some(Gap::new(0, 3)));
        assert_eq!(set.clear(&mut pool), 10);
        assert_eq!(set.first(&pool), None);
        assert!(set.is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_print_lists_gaps() {
        let mut pool = GapPool::new(4);
        let mut set = GapSet::new();
        set.add_gap(&mut pool, Gap::new(5, 1)).unwrap();
        set.add_gap(&mut pool, Gap::new(1, 0)).unwrap();
        let mut lines = Vec::new();
        set.print(&pool, |line| lines.push(line.to_string()));
        assert_eq!(lines, vec!["gap [1, 1] extent 0", "gap [5, 6] extent 1"]);
    }

    #[test]
    fn test_error_fatality() {
        assert!(GapError::Unknown.is_fatal());
        assert!(!GapError::Duplicate.is_fatal());
        assert!(!GapError::AllocFailure.is_fatal());
    }
}
