//! Cache Statistics Module
//!
//! Tracks hit/miss/eviction counters and builds point-in-time snapshots of
//! the entry store.

use serde::Serialize;

// == Counters ==
/// Running counters kept by the entry store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_served: u64,
    pub durable_hits: u64,
}

impl Counters {
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_stale_served(&mut self) {
        self.stale_served += 1;
    }

    pub fn record_durable_hit(&mut self) {
        self.durable_hits += 1;
    }
}

// == Cache Stats ==
/// Snapshot returned by `Stats()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries physically held in memory
    pub total_entries: usize,
    /// Entries that are neither expired nor from an older generation
    pub valid_entries: usize,
    /// Entries still held but no longer servable
    pub expired_entries: usize,
    /// Rough memory footprint of keys and serialized values, in bytes
    pub memory_estimate_bytes: usize,
    /// Reads served from memory
    pub hits: u64,
    /// Reads that found nothing servable in memory
    pub misses: u64,
    /// Memory misses answered by promoting a durable record
    pub durable_hits: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Producer failures masked by an expired entry
    pub stale_served: u64,
    /// Dependency fingerprints held alongside the entries
    pub fingerprints: usize,
    /// Current generation
    pub generation: u64,
    /// In-memory hit rate, hits / (hits + misses)
    pub hit_rate: f64,
}

impl CacheStats {
    pub(crate) fn from_counters(counters: Counters) -> Self {
        Self {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            stale_served: counters.stale_served,
            durable_hits: counters.durable_hits,
            hit_rate: hit_rate(counters.hits, counters.misses),
            ..Self::default()
        }
    }
}

// == Hit Rate ==
/// Returns hits / (hits + misses), or 0.0 if no reads have happened.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
