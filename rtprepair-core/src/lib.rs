//! Sequence-space gap tracking for RTP error repair
//!
//! Keeps the set of sequence-number ranges currently missing from a received
//! packet stream, over the cyclic 32-bit sequence space.
//!
//! ## Architecture
//!
//! - **`seq`**: wraparound-aware comparison and arithmetic on sequence numbers
//! - **`rbtree`**: generic red-black tree over externally stored nodes
//! - **`pool`**: fixed-capacity node allocator backing the tree
//! - **`gap`**: `GapSet`, the ordered set of disjoint missing ranges
//! - **`tracker`**: `LossTracker`, which turns arriving packets into gap updates
//!
//! ## Usage
//!
//! ```rust
//! use rtprepair_core::{Gap, GapPool, GapSet};
//!
//! let mut pool = GapPool::new(64);
//! let mut gaps = GapSet::new();
//! gaps.add_gap(&mut pool, Gap::new(100, 4))?;
//! gaps.remove_seq_num(&mut pool, 102)?;
//! assert_eq!(gaps.extract_min(&mut pool)?, Gap::new(100, 1));
//! assert_eq!(gaps.extract_min(&mut pool)?, Gap::new(103, 1));
//! # Ok::<(), rtprepair_core::GapError>(())
//! ```

pub mod config;
pub mod error;
pub mod gap;
pub mod logging;
pub mod pool;
pub mod rbtree;
pub mod seq;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Result};
pub use gap::{Gap, GapError, GapPool, GapSet, MAX_GAP_EXTENT};
pub use pool::{NodePool, PoolStats};
pub use seq::SeqNum;
pub use tracker::{LossTracker, PacketOutcome, TrackerStats};
