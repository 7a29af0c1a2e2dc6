//! Cache hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub single_hits: u64,
    pub single_misses: u64,
    pub pair_hits: u64,
    pub pair_misses: u64,
    /// Computations that lost the insert race and were dropped.
    pub discarded: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.single_hits + self.pair_hits
    }

    pub fn misses(&self) -> u64 {
        self.single_misses + self.pair_misses
    }

    /// Fraction of lookups served without computing. 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Lock-free counters behind `CacheStats`. Relaxed ordering: the numbers are
/// diagnostics, never used to make cache decisions.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    single_hits: AtomicU64,
    single_misses: AtomicU64,
    pair_hits: AtomicU64,
    pair_misses: AtomicU64,
    discarded: AtomicU64,
    invalidations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn single_hit(&self) {
        self.single_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn single_miss(&self) {
        self.single_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pair_hit(&self) {
        self.pair_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pair_miss(&self) {
        self.pair_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidated(&self, nodes: u64) {
        self.invalidations.fetch_add(nodes, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            single_hits: self.single_hits.load(Ordering::Relaxed),
            single_misses: self.single_misses.load(Ordering::Relaxed),
            pair_hits: self.pair_hits.load(Ordering::Relaxed),
            pair_misses: self.pair_misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_before_any_lookup() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let counters = StatsCounters::default();
        counters.single_miss();
        counters.single_hit();
        counters.pair_hit();
        counters.pair_hit();
        counters.invalidated(3);

        let stats = counters.snapshot();
        assert_eq!(stats.hits(), 3);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.invalidations, 3);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
