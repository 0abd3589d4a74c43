//! Synthetic lossy packet stream
//!
//! Emits consecutive sequence numbers, dropping each with `loss_rate`. A
//! dropped packet is retransmitted with `repair_rate`, arriving
//! `repair_delay` packets later.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtprepair_core::config::SimulationConfig;
use rtprepair_core::SeqNum;
use std::collections::VecDeque;

pub struct LossyStream {
    rng: StdRng,
    next_seq: SeqNum,
    remaining: u64,
    tick: u64,
    loss_rate: f64,
    repair_rate: f64,
    repair_delay: u64,
    /// Retransmissions by due tick; ticks only grow, so the queue stays sorted
    pending: VecDeque<(u64, SeqNum)>,
    lost: u64,
}

impl LossyStream {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            next_seq: config.initial_seq,
            remaining: config.packets,
            tick: 0,
            loss_rate: config.loss_rate,
            repair_rate: config.repair_rate,
            repair_delay: u64::from(config.repair_delay),
            pending: VecDeque::new(),
            lost: 0,
        }
    }

    /// Packets dropped on first transmission so far
    pub const fn lost(&self) -> u64 {
        self.lost
    }
}

impl Iterator for LossyStream {
    type Item = SeqNum;

    fn next(&mut self) -> Option<SeqNum> {
        loop {
            if let Some(&(due, seq)) = self.pending.front() {
                if due <= self.tick || self.remaining == 0 {
                    self.pending.pop_front();
                    return Some(seq);
                }
            }
            if self.remaining == 0 {
                return None;
            }

            self.remaining -= 1;
            self.tick += 1;
            let seq = self.next_seq;
            self.next_seq = seq.wrapping_add(1);

            if self.rng.gen_bool(self.loss_rate) {
                self.lost += 1;
                if self.rng.gen_bool(self.repair_rate) {
                    self.pending.push_back((self.tick + self.repair_delay, seq));
                }
                continue;
            }
            return Some(seq);
        }
    }
}
