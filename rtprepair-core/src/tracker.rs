//! Loss tracking for a single RTP stream
//!
//! Turns the sequence numbers of arriving packets into gap-set updates:
//! a forward jump past the highest sequence number seen opens a gap, and a
//! packet arriving behind it closes (part of) one. Outstanding gaps are
//! drained lowest-first to build repair requests or on teardown.

use crate::config::{GapConfig, TrackerConfig};
use crate::error::{Error, Result};
use crate::gap::{Gap, GapError, GapPool, GapSet, MAX_GAP_EXTENT};
use crate::pool::PoolStats;
use crate::seq::{seq_sub, SeqNum};
use serde::Serialize;
use tracing::{debug, error, warn};

/// What a packet meant for the tracked stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// First packet of the stream
    First,
    /// Next expected sequence number
    InOrder,
    /// Jumped ahead; `missing` sequence numbers were skipped
    Loss { missing: u32 },
    /// Filled a previously missing sequence number
    Repaired,
    /// Already received, or given up on
    Duplicate,
    /// So far behind the live edge that tracking started over
    Restarted,
}

/// Stream counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerStats {
    pub received: u64,
    pub in_order: u64,
    pub loss_events: u64,
    pub seqs_lost: u64,
    pub repaired: u64,
    pub duplicates: u64,
    pub restarts: u64,
    pub add_failures: u64,
    /// Missing sequence numbers given up on (span limit, failed adds, eviction)
    pub seqs_abandoned: u64,
    pub outstanding_gaps: usize,
    pub outstanding_seqs: u64,
    pub pool: PoolStats,
}

pub struct LossTracker {
    gaps: GapSet,
    pool: GapPool,
    highest: Option<SeqNum>,
    config: TrackerConfig,
    stats: TrackerStats,
}

impl LossTracker {
    pub fn new(gap_config: &GapConfig, config: TrackerConfig) -> Result<Self> {
        if gap_config.pool_capacity == 0 {
            return Err(Error::InvalidInput(
                "gap pool capacity must be greater than 0".to_string(),
            ));
        }
        if config.max_gap_span == 0 {
            return Err(Error::InvalidInput(
                "max gap span must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            gaps: GapSet::new(),
            pool: GapPool::new(gap_config.pool_capacity),
            highest: None,
            config,
            stats: TrackerStats::default(),
        })
    }

    /// Highest sequence number seen so far
    #[must_use]
    pub const fn highest(&self) -> Option<SeqNum> {
        self.highest
    }

    /// Account for an arriving packet.
    ///
    /// Errors are only returned when the gap set could not record the
    /// arrival; the tracker stays usable afterwards.
    pub fn on_packet(&mut self, seq: SeqNum) -> Result<PacketOutcome> {
        self.stats.received += 1;

        let Some(highest) = self.highest else {
            self.highest = Some(seq);
            return Ok(PacketOutcome::First);
        };

        let delta = seq_sub(seq, highest);
        if delta == 1 {
            self.advance(seq);
            self.stats.in_order += 1;
            return Ok(PacketOutcome::InOrder);
        }
        if delta > 1 {
            self.advance(seq);
            let missing = delta.unsigned_abs() - 1;
            self.record_loss(seq, missing);
            return Ok(PacketOutcome::Loss { missing });
        }

        let behind = delta.unsigned_abs();
        if behind > self.config.max_reorder {
            let dropped = self.gaps.clear(&mut self.pool);
            warn!(seq, highest, behind, dropped, "sequence jumped backwards, restarting");
            self.highest = Some(seq);
            self.stats.restarts += 1;
            return Ok(PacketOutcome::Restarted);
        }

        match self.gaps.remove_seq_num(&mut self.pool, seq) {
            Ok(()) => {
                self.stats.repaired += 1;
                Ok(PacketOutcome::Repaired)
            }
            Err(GapError::GapNotFound) => {
                self.stats.duplicates += 1;
                Ok(PacketOutcome::Duplicate)
            }
            Err(e) => {
                if e.is_fatal() {
                    error!(seq, error = %e, "gap set corrupted");
                } else {
                    warn!(seq, error = %e, "failed to record repaired packet");
                }
                Err(e.into())
            }
        }
    }

    /// Extract up to `limit` outstanding gaps, lowest first.
    pub fn drain(&mut self, limit: usize) -> Vec<Gap> {
        let mut out = Vec::new();
        while out.len() < limit {
            match self.gaps.extract_min(&mut self.pool) {
                Ok(gap) => out.push(gap),
                Err(GapError::TreeIsEmpty) => break,
                Err(e) => {
                    error!(error = %e, "failed to drain gap set");
                    break;
                }
            }
        }
        out
    }

    /// Outstanding gaps in ascending order
    pub fn gaps(&self) -> impl Iterator<Item = Gap> + '_ {
        self.gaps.iter(&self.pool)
    }

    /// Write the outstanding gaps through `emit`, one line each
    pub fn print_gaps<F: FnMut(&str)>(&self, emit: F) {
        self.gaps.print(&self.pool, emit);
    }

    #[must_use]
    pub fn is_missing(&self, seq: SeqNum) -> bool {
        self.gaps.contains(&self.pool, seq)
    }

    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            outstanding_gaps: self.gaps.len(&self.pool),
            outstanding_seqs: self.gaps.missing_count(&self.pool),
            pool: self.pool.stats(),
            ..self.stats.clone()
        }
    }

    /// Move the live edge to `seq` and give up on gaps that fell out of the
    /// reorder window.
    fn advance(&mut self, seq: SeqNum) {
        self.highest = Some(seq);
        let mut evicted = 0u64;
        while let Some(oldest) = self.gaps.first(&self.pool) {
            let behind = seq_sub(seq, oldest.end_seq());
            if behind <= 0 || behind.unsigned_abs() <= self.config.max_reorder {
                break;
            }
            match self.gaps.extract_min(&mut self.pool) {
                Ok(gap) => evicted += u64::from(gap.seq_count()),
                Err(e) => {
                    error!(error = %e, "failed to evict stale gap");
                    break;
                }
            }
        }
        if evicted > 0 {
            self.stats.seqs_abandoned += evicted;
            debug!(seq, evicted, "stale gaps evicted");
        }
    }

    /// Record `[seq - missing, seq - 1]` as lost, in chunks the gap set accepts.
    fn record_loss(&mut self, seq: SeqNum, missing: u32) {
        let span = missing.min(self.config.max_gap_span);
        if span < missing {
            let abandoned = missing - span;
            self.stats.seqs_abandoned += u64::from(abandoned);
            debug!(seq, missing, abandoned, "loss burst wider than tracked span");
        }
        self.stats.loss_events += 1;

        let max_chunk = u32::from(MAX_GAP_EXTENT) + 1;
        let mut start = seq.wrapping_sub(span);
        let mut remaining = span;
        while remaining > 0 {
            let chunk = remaining.min(max_chunk);
            let extent = u16::try_from(chunk - 1).unwrap_or(MAX_GAP_EXTENT);
            match self.gaps.add_gap(&mut self.pool, Gap::new(start, extent)) {
                Ok(()) => {
                    self.stats.seqs_lost += u64::from(chunk);
                    debug!(start, extent, "loss recorded");
                }
                Err(e) => {
                    self.stats.add_failures += 1;
                    self.stats.seqs_abandoned += u64::from(chunk);
                    warn!(start, extent, error = %e, "failed to record loss");
                }
            }
            start = start.wrapping_add(chunk);
            remaining -= chunk;
        }
    }
}
