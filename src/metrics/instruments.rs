//! Per-series instrument storage.
//!
//! Each labeled series owns exactly one of these cells. Counters and gauges
//! are single atomics; histograms keep count, sum and per-bucket counts
//! behind one short-lived mutex so a reader can never observe the triple
//! half-updated.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Monotonic 64-bit accumulator.
#[derive(Debug, Default)]
pub struct CounterCell {
    value: AtomicU64,
}

impl CounterCell {
    pub fn add(&self, by: u64) {
        self.value.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Last-written f64, stored as raw bits in an atomic.
#[derive(Debug, Default)]
pub struct GaugeCell {
    bits: AtomicU64,
}

impl GaugeCell {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        // CAS loop keeps concurrent add/sub from losing updates.
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Bucketed distribution. `counts` has one slot per upper bound plus a
/// trailing overflow slot for observations above the top bound.
#[derive(Debug)]
pub struct HistogramCell {
    state: Mutex<HistogramState>,
}

#[derive(Debug)]
struct HistogramState {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Point-in-time copy of one histogram series. Bucket counts are cumulative
/// and the final entry is the implicit `+Inf` bucket, so
/// `buckets.last().1 == count` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramCell {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            state: Mutex::new(HistogramState {
                counts: vec![0; bucket_count + 1],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Record one observation. `bounds` must be the sorted upper bounds the
    /// owning family was created with.
    pub fn observe(&self, bounds: &[f64], value: f64) {
        let slot = bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(bounds.len());

        let mut state = self.state.lock();
        state.counts[slot] += 1;
        state.sum += value;
        state.count += 1;
    }

    pub fn snapshot(&self, bounds: &[f64]) -> HistogramSnapshot {
        let state = self.state.lock();
        let mut buckets = Vec::with_capacity(bounds.len() + 1);
        let mut cumulative = 0u64;
        for (bound, slot) in bounds.iter().zip(state.counts.iter()) {
            cumulative += slot;
            buckets.push((*bound, cumulative));
        }
        buckets.push((f64::INFINITY, state.count));
        HistogramSnapshot {
            buckets,
            sum: state.sum,
            count: state.count,
        }
    }
}
