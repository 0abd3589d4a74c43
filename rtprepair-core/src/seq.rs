//! Cyclic 32-bit sequence number arithmetic
//!
//! Sequence numbers wrap at 2^32. `a` is considered less than `b` when the
//! difference `a - b`, read as a signed 32-bit value, is negative. The
//! ordering is only meaningful while the values being compared are less
//! than 2^31 apart.

use crate::rbtree::Compare;
use std::cmp::Ordering;

/// A 32-bit sequence number with wraparound ordering
pub type SeqNum = u32;

/// Signed cyclic distance `a - b`
#[must_use]
#[inline]
pub const fn seq_sub(a: SeqNum, b: SeqNum) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Advance `a` by a signed `delta`, wrapping at the top of the space
#[must_use]
#[inline]
pub const fn seq_add(a: SeqNum, delta: i32) -> SeqNum {
    a.wrapping_add_signed(delta)
}

#[must_use]
#[inline]
pub const fn seq_lt(a: SeqNum, b: SeqNum) -> bool {
    seq_sub(a, b) < 0
}

#[must_use]
#[inline]
pub const fn seq_gt(a: SeqNum, b: SeqNum) -> bool {
    seq_sub(a, b) > 0
}

#[must_use]
#[inline]
pub const fn seq_eq(a: SeqNum, b: SeqNum) -> bool {
    a == b
}

#[must_use]
#[inline]
pub const fn seq_ne(a: SeqNum, b: SeqNum) -> bool {
    a != b
}

#[must_use]
#[inline]
pub const fn seq_le(a: SeqNum, b: SeqNum) -> bool {
    seq_sub(a, b) <= 0
}

#[must_use]
#[inline]
pub const fn seq_ge(a: SeqNum, b: SeqNum) -> bool {
    seq_sub(a, b) >= 0
}

/// Three-way cyclic comparison
#[must_use]
#[inline]
pub const fn seq_cmp(a: SeqNum, b: SeqNum) -> Ordering {
    let d = seq_sub(a, b);
    if d < 0 {
        Ordering::Less
    } else if d > 0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Key order for trees keyed by sequence number
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqOrder;

impl Compare<SeqNum> for SeqOrder {
    #[inline]
    fn compare(a: &SeqNum, b: &SeqNum) -> Ordering {
        seq_cmp(*a, *b)
    }
}
