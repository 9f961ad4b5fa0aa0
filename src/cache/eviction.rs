//! Eviction Module
//!
//! Two-phase reclamation run on the write path when the store is full:
//! 1. drop every expired or stale-generation entry
//! 2. if still full, drop the oldest 30% of entries by `stored_at`
//!
//! Ordering is by write time only. Reads do not refresh an entry's position.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cache::{CacheEntry, Generation};

/// Share of entries removed by the age-based phase, in percent.
pub const EVICTION_PERCENT: usize = 30;

// == Eviction Report ==
/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed because they were expired or stale
    pub swept: usize,
    /// Live entries removed by age
    pub evicted: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.swept + self.evicted
    }
}

// == Sweep ==
/// Removes every entry that is expired at `now` or older than `generation`.
///
/// Returns the number of entries removed.
pub fn sweep<V>(
    entries: &mut HashMap<String, CacheEntry<V>>,
    now: DateTime<Utc>,
    generation: Generation,
) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(now, generation));
    before - entries.len()
}

// == Age Eviction ==
/// Number of entries the age phase removes from a store holding `len` entries.
///
/// Rounded up and never zero for a non-empty store, so a full store always
/// makes room for at least one insert.
pub fn age_eviction_count(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    ((len * EVICTION_PERCENT).div_ceil(100)).max(1)
}

/// Keys of the `count` oldest entries, oldest first. Ties break on key.
pub fn oldest_keys<V>(entries: &HashMap<String, CacheEntry<V>>, count: usize) -> Vec<String> {
    let mut by_age: Vec<(&DateTime<Utc>, &String)> = entries
        .iter()
        .map(|(key, entry)| (&entry.stored_at, key))
        .collect();
    by_age.sort_unstable();
    by_age
        .into_iter()
        .take(count)
        .map(|(_, key)| key.clone())
        .collect()
}

// == Two-Phase Pass ==
/// Brings `entries` below `max_entries` if it is at or above it.
pub fn make_room<V>(
    entries: &mut HashMap<String, CacheEntry<V>>,
    max_entries: usize,
    now: DateTime<Utc>,
    generation: Generation,
) -> EvictionReport {
    let mut report = EvictionReport::default();
    if entries.len() < max_entries {
        return report;
    }

    report.swept = sweep(entries, now, generation);
    if entries.len() < max_entries {
        return report;
    }

    let victims = oldest_keys(entries, age_eviction_count(entries.len()));
    for key in &victims {
        entries.remove(key);
    }
    report.evicted = victims.len();
    report
}
