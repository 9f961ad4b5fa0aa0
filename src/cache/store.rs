//! Entry Store Module
//!
//! In-memory key → entry map with TTL expiry, generation checks, bounded size
//! and the dependency-fingerprint ledger. All methods are synchronous; the
//! owner serializes access behind one lock.
//!
//! A fingerprint only lives as long as the entry it describes, so the ledger
//! is bounded by `max_entries` as well.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::cache::deps::{deps_key, DEPS_SUFFIX};
use crate::cache::eviction::{self, EvictionReport};
use crate::cache::stats::Counters;
use crate::cache::{CacheEntry, CacheStats, Category, Clock, EntryInfo, Generation, TtlPolicy};

/// Rough per-entry bookkeeping overhead added to the memory estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

// == Lookup ==
/// Result of a non-purging read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Present and servable
    Fresh(V),
    /// Present but expired or from an older generation
    Expired(V),
    /// Not held at all
    Missing,
}

// == Entry Store ==
/// In-memory tier of the cache.
#[derive(Debug)]
pub struct EntryStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Dependency fingerprints, keyed by `key + ":deps"`
    fingerprints: HashMap<String, CacheEntry<String>>,
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
    generation: Generation,
    counters: Counters,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl<V> EntryStore<V> {
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `max_entries` - Capacity that triggers eviction on write (minimum 1)
    /// * `policy` - Category TTL table and default TTL
    /// * `clock` - Time source used to stamp and expire entries
    pub fn new(max_entries: usize, policy: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            fingerprints: HashMap::new(),
            policy,
            clock,
            generation: Generation::default(),
            counters: Counters::default(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The TTL resolves as `ttl ?? policy[category] ?? default`. When the key is
    /// new and the store is full, eviction runs before the insert.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        category: Option<Category>,
    ) -> EntryInfo {
        let ttl = self.policy.resolve(ttl, category);
        let entry = CacheEntry::new(value, self.now(), ttl, self.generation, category);
        self.insert(key.into(), entry)
    }

    /// Inserts a prebuilt entry, restamped with the current generation.
    pub fn insert(&mut self, key: String, mut entry: CacheEntry<V>) -> EntryInfo {
        entry.generation = self.generation;

        if !self.entries.contains_key(&key) {
            let now = self.now();
            let report =
                eviction::make_room(&mut self.entries, self.max_entries, now, self.generation);
            if report.total() > 0 {
                self.drop_orphaned_fingerprints();
            }
            self.note_eviction(report);
        }

        let info = EntryInfo::from(&entry);
        self.entries.insert(key, entry);
        info
    }

    // == Get ==
    /// Returns the value if fresh. Expired or stale entries are purged.
    pub fn get(&mut self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        if self.has(key) {
            self.counters.record_hit();
            self.entries.get(key).map(|entry| entry.value.clone())
        } else {
            self.counters.record_miss();
            None
        }
    }

    // == Has ==
    /// Same freshness check as `get`, without cloning the value or touching counters.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.now();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now, self.generation) => true,
            Some(_) => {
                self.forget(key);
                debug!(key, "Purged expired entry on read");
                false
            }
            None => false,
        }
    }

    // == Lookup ==
    /// Reads without purging, so an expired value stays available as a fallback.
    ///
    /// Counts a hit for `Fresh` and a miss otherwise.
    pub fn lookup(&mut self, key: &str) -> Lookup<V>
    where
        V: Clone,
    {
        let now = self.now();
        let result = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now, self.generation) => Lookup::Fresh(entry.value.clone()),
            Some(entry) => Lookup::Expired(entry.value.clone()),
            None => Lookup::Missing,
        };
        match result {
            Lookup::Fresh(_) => self.counters.record_hit(),
            _ => self.counters.record_miss(),
        }
        result
    }

    /// Fresh value under `key`, without purging or counting.
    pub fn fresh_value(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let now = self.now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now, self.generation))
            .map(|entry| entry.value.clone())
    }

    /// Entry physically held under `key`, whatever its freshness.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Metadata of the entry held under `key`.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.entries.get(key).map(EntryInfo::from)
    }

    // == Delete ==
    /// Removes `key` and its fingerprint. Returns whether an entry was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.forget(key)
    }

    fn forget(&mut self, key: &str) -> bool {
        self.fingerprints.remove(&deps_key(key));
        self.entries.remove(key).is_some()
    }

    // == Clear ==
    /// Removes every entry and fingerprint. Returns the number of entries removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.fingerprints.clear();
        count
    }

    // == Prefix Removal ==
    /// Removes every entry and fingerprint whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed, fingerprints not included.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        self.fingerprints.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    // == Sweep ==
    /// Removes all expired and stale entries and fingerprints.
    pub fn sweep_expired(&mut self) -> usize {
        let now = self.now();
        eviction::sweep(&mut self.fingerprints, now, self.generation);
        let removed = eviction::sweep(&mut self.entries, now, self.generation);
        if removed > 0 {
            self.drop_orphaned_fingerprints();
        }
        removed
    }

    // == Generation ==
    /// Advances the generation and clears the store in the same step.
    pub fn bump_generation(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.clear();
        self.generation
    }

    /// Moves the generation forward to `generation` if it is ahead.
    ///
    /// Entries held under the old generation become stale.
    pub fn advance_generation_to(&mut self, generation: Generation) -> bool {
        if generation > self.generation {
            self.generation = generation;
            true
        } else {
            false
        }
    }

    // == Fingerprints ==
    /// Fresh fingerprint stored under `deps_key`.
    pub fn fingerprint(&mut self, deps_key: &str) -> Option<String> {
        let now = self.now();
        match self.fingerprints.get(deps_key) {
            Some(entry) if entry.is_fresh(now, self.generation) => Some(entry.value.clone()),
            Some(_) => {
                self.fingerprints.remove(deps_key);
                None
            }
            None => None,
        }
    }

    /// Stores a fingerprint with the static TTL.
    ///
    /// Skipped when the entry it belongs to is not held, returning false.
    pub fn set_fingerprint(&mut self, deps_key: impl Into<String>, fingerprint: String) -> bool {
        let deps_key = deps_key.into();
        let owned = deps_key
            .strip_suffix(DEPS_SUFFIX)
            .is_some_and(|key| self.entries.contains_key(key));
        if !owned {
            return false;
        }

        let entry = CacheEntry::new(
            fingerprint,
            self.now(),
            self.policy.fingerprint_ttl(),
            self.generation,
            Some(Category::Static),
        );
        self.fingerprints.insert(deps_key, entry);
        true
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.len()
    }

    fn drop_orphaned_fingerprints(&mut self) {
        let entries = &self.entries;
        self.fingerprints.retain(|deps_key, _| {
            deps_key
                .strip_suffix(DEPS_SUFFIX)
                .is_some_and(|key| entries.contains_key(key))
        });
    }

    // == Counters ==
    pub fn record_stale_served(&mut self) {
        self.counters.record_stale_served();
    }

    pub fn record_durable_hit(&mut self) {
        self.counters.record_durable_hit();
    }

    fn note_eviction(&mut self, report: EvictionReport) {
        if report.total() > 0 {
            self.counters.record_evictions(report.evicted);
            debug!(
                swept = report.swept,
                evicted = report.evicted,
                remaining = self.entries.len(),
                "Made room in entry store"
            );
        }
    }

    // == Length ==
    /// Number of entries physically held, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Serialize> EntryStore<V> {
    // == Stats ==
    /// Snapshot of entry counts, memory estimate and counters.
    pub fn stats(&self) -> CacheStats {
        let now = self.now();
        let mut stats = CacheStats::from_counters(self.counters);

        stats.total_entries = self.entries.len();
        stats.valid_entries = self
            .entries
            .values()
            .filter(|entry| entry.is_fresh(now, self.generation))
            .count();
        stats.expired_entries = stats.total_entries - stats.valid_entries;
        stats.memory_estimate_bytes = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let value_len = serde_json::to_vec(&entry.value).map(|v| v.len()).unwrap_or(0);
                key.len() + value_len + ENTRY_OVERHEAD_BYTES
            })
            .sum();
        stats.fingerprints = self.fingerprints.len();
        stats.generation = self.generation.value();
        stats
    }
}
