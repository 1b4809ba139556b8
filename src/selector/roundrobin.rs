//! Round Robin selector implementation
//!
//! Per `(service, method)` key the selector keeps a weight cursor and,
//! on the weighted path, a candidate cursor. A candidate of weight `w`
//! is returned `w` times per `max-weight`-long super-period, interleaved
//! with the others. Selection holds no lock across the candidate list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::Weighted;
use crate::{DubboError, Result};

/// Counters wrap at a large positive bound
const SEQUENCE_MASK: u64 = 0x7fff_ffff;

/// Atomic counter that never yields a negative value: reads take the
/// low-order bits of an unsigned increment.
struct PositiveSequence(AtomicU64);

impl PositiveSequence {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Starts one increment before zero, so the first
    /// `increment_and_get` lands on 0.
    fn before_zero() -> Self {
        Self(AtomicU64::new(u64::MAX))
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed) & SEQUENCE_MASK
    }

    fn get_and_increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MASK
    }

    fn increment_and_get(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & SEQUENCE_MASK
    }
}

/// Process-wide selector state
static GLOBAL: Lazy<RoundRobin> = Lazy::new(RoundRobin::new);

/// Round Robin selector with weight-proportional fairness.
///
/// State per `(service, method)` key is created lazily and retained for
/// the process lifetime; tests create their own instance for isolation.
#[derive(Default)]
pub struct RoundRobin {
    sequences: DashMap<String, Arc<PositiveSequence>>,
    index_seqs: DashMap<String, Arc<PositiveSequence>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            sequences: DashMap::new(),
            index_seqs: DashMap::new(),
        }
    }

    /// The process-wide selector instance.
    pub fn global() -> &'static RoundRobin {
        &GLOBAL
    }

    /// Pick one candidate for the `(service_key, method)` call identity.
    ///
    /// Equal (or all-zero) weights degenerate to strict rotation; mixed
    /// weights rotate through the positive-weight subset against a weight
    /// baseline that rises once per round, so only candidates above the
    /// baseline qualify. An empty candidate list is a caller bug and
    /// errors out.
    pub fn select<'a, T: Weighted>(
        &self,
        service_key: &str,
        method: &str,
        candidates: &'a [T],
    ) -> Result<&'a T> {
        if candidates.is_empty() {
            return Err(DubboError::NoEndpoint);
        }
        let key = format!("{}.{}", service_key, method);

        let mut max_weight = 0u32;
        let mut min_weight = u32::MAX;
        let mut non_zero: Vec<usize> = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let weight = candidate.weight();
            max_weight = max_weight.max(weight);
            min_weight = min_weight.min(weight);
            if weight > 0 {
                non_zero.push(index);
            }
        }

        let sequence = self.sequence(&key);

        if max_weight > 0 && min_weight < max_weight {
            if non_zero.is_empty() {
                return Err(DubboError::NoEndpoint);
            }
            let index_seq = self.index_sequence(&key);
            let length = non_zero.len();
            loop {
                let index = (index_seq.increment_and_get() as usize) % length;
                let current_weight = if index == 0 {
                    sequence.increment_and_get() % max_weight as u64
                } else {
                    sequence.get() % max_weight as u64
                };
                let candidate = &candidates[non_zero[index]];
                if candidate.weight() as u64 > current_weight {
                    return Ok(candidate);
                }
            }
        }

        Ok(&candidates[(sequence.get_and_increment() as usize) % candidates.len()])
    }

    fn sequence(&self, key: &str) -> Arc<PositiveSequence> {
        if let Some(sequence) = self.sequences.get(key) {
            return Arc::clone(&sequence);
        }
        Arc::clone(
            &self
                .sequences
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(PositiveSequence::new())),
        )
    }

    fn index_sequence(&self, key: &str) -> Arc<PositiveSequence> {
        if let Some(sequence) = self.index_seqs.get(key) {
            return Arc::clone(&sequence);
        }
        Arc::clone(
            &self
                .index_seqs
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(PositiveSequence::before_zero())),
        )
    }
}
