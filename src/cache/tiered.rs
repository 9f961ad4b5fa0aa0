//! Tiered Cache Module
//!
//! Coordinates the in-memory entry store with an optional durable tier and
//! provides the read-through accessors.
//!
//! # Locking
//! - One async mutex guards the entry store; every store operation runs
//!   atomically under it.
//! - Durable tier I/O and producers always run with that lock released.
//! - Every operation that touches the durable tier holds the durable gate
//!   for its memory step and its durable step together, so both tiers see
//!   writes, deletes and promotions in the same order. The gate is taken
//!   before the store lock, never while holding it.
//! - With single-flight enabled, concurrent misses on one key wait on a
//!   per-key gate so only one producer runs at a time.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::cache::deps::{deps_key, fingerprint};
use crate::cache::store::{EntryStore, Lookup};
use crate::cache::{
    CacheEntry, CacheStats, Category, Clock, EntryInfo, Generation, SystemClock, TtlPolicy,
};
use crate::config::Config;
use crate::durable::{DurableRecord, DurableTier, FsDurableTier, GENERATION_KEY};
use crate::tasks::{spawn_sweeper_task, SweeperGuard};

type Flights = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

// == Entry Options ==
/// Optional TTL and category for a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub ttl: Option<Duration>,
    pub category: Option<Category>,
}

impl EntryOptions {
    pub fn category(category: Category) -> Self {
        Self {
            ttl: None,
            category: Some(category),
        }
    }

    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            category: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

// == Builder ==
/// Builder for `TieredCache`.
pub struct TieredCacheBuilder {
    max_entries: usize,
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
    durable: Option<Arc<dyn DurableTier>>,
    single_flight: bool,
}

impl TieredCacheBuilder {
    /// Starts from `Config::default()`, the system clock and no durable tier.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableTier>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn build<V>(self) -> TieredCache<V> {
        let policy = Arc::new(self.policy.clone());
        TieredCache {
            store: Arc::new(Mutex::new(EntryStore::new(
                self.max_entries,
                self.policy,
                self.clock,
            ))),
            policy,
            durable: self.durable,
            durable_gate: Arc::default(),
            flights: Arc::default(),
            single_flight: self.single_flight,
            sweeper: None,
        }
    }
}

impl Default for TieredCacheBuilder {
    fn default() -> Self {
        let config = Config::default();
        Self {
            max_entries: config.max_entries,
            policy: config.ttl_policy(),
            clock: Arc::new(SystemClock),
            durable: None,
            single_flight: config.single_flight,
        }
    }
}

// == Tiered Cache ==
/// Cache instance shared by cloning. Clones see the same entries.
pub struct TieredCache<V> {
    store: Arc<Mutex<EntryStore<V>>>,
    policy: Arc<TtlPolicy>,
    durable: Option<Arc<dyn DurableTier>>,
    durable_gate: Arc<Mutex<()>>,
    flights: Flights,
    single_flight: bool,
    /// Background sweeper started by `from_config`, aborted with the last clone
    sweeper: Option<Arc<SweeperGuard>>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy.clone(),
            durable: self.durable.clone(),
            durable_gate: self.durable_gate.clone(),
            flights: self.flights.clone(),
            single_flight: self.single_flight,
            sweeper: self.sweeper.clone(),
        }
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Memory-only cache with the system clock.
    pub fn new(max_entries: usize, policy: TtlPolicy) -> Self {
        TieredCacheBuilder::new().max_entries(max_entries).policy(policy).build()
    }

    /// Builds a cache from configuration.
    ///
    /// A configured durable directory that cannot be opened is logged and the
    /// cache runs memory-only. A durable tier restores the persisted generation.
    /// A non-zero sweep interval starts the sweeper, which stops once every
    /// clone of the returned cache is dropped.
    pub async fn from_config(config: &Config) -> Self {
        let mut builder = TieredCacheBuilder::new()
            .max_entries(config.max_entries)
            .policy(config.ttl_policy())
            .single_flight(config.single_flight);

        if let Some(dir) = &config.durable_dir {
            match FsDurableTier::open(dir).await {
                Ok(tier) => builder = builder.durable(Arc::new(tier)),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Durable tier unavailable, running memory-only"),
            }
        }

        let mut cache = builder.build();
        cache.restore_generation().await;

        if let Some(interval) = config.sweep_interval() {
            // The task's clone carries no guard, so it cannot keep itself alive
            let handle = spawn_sweeper_task(cache.clone(), interval);
            cache.sweeper = Some(Arc::new(SweeperGuard::new(handle)));
        }
        cache
    }

    // == Set ==
    /// Stores `value`, mirroring it to the durable tier for durable categories.
    pub async fn set(&self, key: &str, value: V, options: EntryOptions) {
        let mirrored = self.durable.is_some()
            && options.category.is_some_and(|c| self.policy.is_durable(c));
        if !mirrored {
            self.store
                .lock()
                .await
                .set(key, value, options.ttl, options.category);
            return;
        }

        let _gate = self.durable_gate().await;
        let info = self
            .store
            .lock()
            .await
            .set(key, value.clone(), options.ttl, options.category);
        self.persist(key, value, &info).await;
    }

    // == Get ==
    /// Fresh value for `key` from memory, else from the durable tier.
    pub async fn get(&self, key: &str) -> Option<V> {
        let hit = self.store.lock().await.get(key);
        match hit {
            Some(value) => Some(value),
            None => self.promote(key).await,
        }
    }

    // == Has ==
    /// Whether `get` would find a fresh value. Does not promote.
    pub async fn has(&self, key: &str) -> bool {
        if self.store.lock().await.has(key) {
            return true;
        }
        let _gate = self.durable_gate().await;
        self.read_durable(key).await.is_some()
    }

    // == Delete ==
    /// Removes `key` from both tiers. Absent keys are a no-op.
    pub async fn delete(&self, key: &str) {
        let _gate = self.durable_gate().await;
        let removed = self.store.lock().await.delete(key);
        if removed {
            debug!(key, "Deleted cache entry");
        }
        self.durable_delete(key).await;
    }

    // == Clear ==
    /// Removes every entry from both tiers. The generation is kept.
    pub async fn clear(&self) {
        let _gate = self.durable_gate().await;
        let (removed, generation) = {
            let mut store = self.store.lock().await;
            (store.clear(), store.generation())
        };
        info!(removed, "Cleared cache");
        self.durable_clear("").await;
        self.persist_generation(generation).await;
    }

    // == Invalidation ==
    /// Removes every key starting with `prefix` from both tiers.
    ///
    /// Returns the number of in-memory entries removed.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        if prefix.is_empty() {
            let removed = self.len().await;
            self.clear().await;
            return removed;
        }

        let _gate = self.durable_gate().await;
        let (removed, generation) = {
            let mut store = self.store.lock().await;
            (store.remove_prefix(prefix), store.generation())
        };
        info!(prefix, removed, "Invalidated cache entries by prefix");
        self.durable_clear(prefix).await;
        if GENERATION_KEY.starts_with(prefix) {
            self.persist_generation(generation).await;
        }
        removed
    }

    /// Removes every key under the `category:` prefix convention.
    pub async fn invalidate_by_category(&self, category: Category) -> usize {
        self.invalidate_by_prefix(&category.key_prefix()).await
    }

    /// Advances the generation and clears both tiers.
    ///
    /// The memory bump and clear happen under one lock acquisition. Durable
    /// records written before the bump are rejected on read even if the
    /// durable clear has not finished yet.
    pub async fn bump_epoch(&self) -> Generation {
        let _gate = self.durable_gate().await;
        let (generation, removed) = {
            let mut store = self.store.lock().await;
            let removed = store.len();
            (store.bump_generation(), removed)
        };
        info!(%generation, removed, "Bumped cache generation");
        self.durable_clear("").await;
        self.persist_generation(generation).await;
        generation
    }

    /// Loads the persisted generation from the durable tier, if newer.
    pub async fn restore_generation(&self) -> Generation {
        let Some(durable) = &self.durable else {
            return self.generation().await;
        };

        let _gate = self.durable_gate().await;
        match durable.persist_get(GENERATION_KEY).await {
            Ok(Some(blob)) => match serde_json::from_slice::<Generation>(&blob) {
                Ok(persisted) => {
                    if self.store.lock().await.advance_generation_to(persisted) {
                        info!(generation = %persisted, "Restored cache generation");
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable persisted generation"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read persisted generation"),
        }
        self.generation().await
    }

    // == Get Or Fetch ==
    /// Returns the cached value, else runs `producer` and caches its result.
    ///
    /// If `producer` fails while an expired entry for `key` is still held in
    /// memory, that entry's value is returned instead of the error. The
    /// producer runs without any cache lock held and at most once per call.
    ///
    /// With single-flight enabled a producer must not call `get_or_fetch` for
    /// its own key.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        options: EntryOptions,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if let Some(value) = self.cached(key).await {
            return Ok(value);
        }

        let _flight = if self.single_flight {
            let flight = self.join_flight(key).await;
            // Another caller may have filled the key while we waited
            if let Some(value) = self.store.lock().await.fresh_value(key) {
                return Ok(value);
            }
            Some(flight)
        } else {
            None
        };

        match producer().await {
            Ok(value) => {
                self.set(key, value.clone(), options).await;
                Ok(value)
            }
            Err(err) => {
                let stale = {
                    let mut store = self.store.lock().await;
                    let stale = store.peek(key).map(|entry| entry.value.clone());
                    if stale.is_some() {
                        store.record_stale_served();
                    }
                    stale
                };
                match stale {
                    Some(value) => {
                        warn!(key, error = %err, "Producer failed, serving expired entry");
                        Ok(value)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// `get_or_fetch` that first invalidates `key` when its dependency set changed.
    ///
    /// The fingerprint of `dependencies` is order-independent and is stored
    /// under `key + ":deps"` with the static TTL after a successful call.
    pub async fn get_or_fetch_with_deps<S, F, Fut, E>(
        &self,
        key: &str,
        dependencies: &[S],
        options: EntryOptions,
        producer: F,
    ) -> Result<V, E>
    where
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        let current = fingerprint(dependencies);
        let ledger_key = deps_key(key);

        let stored = self.store.lock().await.fingerprint(&ledger_key);
        if stored.as_deref() != Some(current.as_str()) {
            debug!(key, "Dependencies changed, invalidating entry");
            self.delete(key).await;
        }

        let value = self.get_or_fetch(key, options, producer).await?;
        self.store
            .lock()
            .await
            .set_fingerprint(ledger_key, current);
        Ok(value)
    }

    // == Introspection ==
    /// Entry counts, memory estimate and counters.
    pub async fn stats(&self) -> CacheStats {
        self.store.lock().await.stats()
    }

    /// Metadata of the entry physically held in memory under `key`.
    pub async fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.store.lock().await.entry_info(key)
    }

    pub async fn generation(&self) -> Generation {
        self.store.lock().await.generation()
    }

    /// Entries physically held in memory.
    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    /// Removes expired and stale entries from memory.
    pub async fn sweep_expired(&self) -> usize {
        self.store.lock().await.sweep_expired()
    }

    // == Internals ==
    /// Fresh value from memory (counted), else a durable promotion.
    async fn cached(&self, key: &str) -> Option<V> {
        let lookup = self.store.lock().await.lookup(key);
        match lookup {
            Lookup::Fresh(value) => Some(value),
            Lookup::Expired(_) | Lookup::Missing => self.promote(key).await,
        }
    }

    /// Reads a servable record from the durable tier into memory.
    async fn promote(&self, key: &str) -> Option<V> {
        let _gate = self.durable_gate().await;
        let record = self.read_durable(key).await?;

        let mut store = self.store.lock().await;
        // A concurrent write beat us here; it is newer than the durable copy
        if let Some(value) = store.fresh_value(key) {
            return Some(value);
        }
        // Re-check under the lock so a concurrent bump is honoured
        let now = store.now();
        if !record.is_fresh(now, store.generation()) {
            return None;
        }

        let entry = CacheEntry::with_expiry(
            record.value.clone(),
            now,
            record.expires_at,
            store.generation(),
            record.category,
        );
        store.insert(key.to_string(), entry);
        store.record_durable_hit();
        debug!(key, "Promoted durable record to memory");
        Some(record.value)
    }

    /// Servable durable record for `key`. Unreadable, expired and stale
    /// records are deleted. Callers hold the durable gate.
    async fn read_durable(&self, key: &str) -> Option<DurableRecord<V>> {
        let durable = self.durable.as_ref()?;
        if key == GENERATION_KEY {
            return None;
        }

        let blob = match durable.persist_get(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Durable read failed");
                return None;
            }
        };

        let record = match DurableRecord::<V>::decode(key, &blob) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Dropping malformed durable record");
                self.durable_delete(key).await;
                return None;
            }
        };

        let (now, generation) = {
            let store = self.store.lock().await;
            (store.now(), store.generation())
        };
        if record.is_fresh(now, generation) {
            Some(record)
        } else {
            debug!(key, "Dropping expired durable record");
            self.durable_delete(key).await;
            None
        }
    }

    async fn persist(&self, key: &str, value: V, info: &EntryInfo) {
        let Some(durable) = &self.durable else {
            return;
        };

        let record = DurableRecord {
            value,
            expires_at: info.expires_at,
            epoch: info.generation,
            category: info.category,
        };
        let blob = match record.encode() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode durable record");
                return;
            }
        };
        let ttl = (info.expires_at - info.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if let Err(e) = durable.persist_set(key, blob, ttl).await {
            warn!(key, error = %e, "Durable write failed");
        }
    }

    async fn persist_generation(&self, generation: Generation) {
        let Some(durable) = &self.durable else {
            return;
        };
        let blob = match serde_json::to_vec(&generation) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "Failed to encode generation");
                return;
            }
        };
        if let Err(e) = durable.persist_set(GENERATION_KEY, blob, Duration::MAX).await {
            warn!(error = %e, "Failed to persist generation");
        }
    }

    async fn durable_delete(&self, key: &str) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.persist_delete(key).await {
                warn!(key, error = %e, "Durable delete failed");
            }
        }
    }

    async fn durable_clear(&self, prefix: &str) {
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.persist_clear_all(prefix).await {
                warn!(prefix, error = %e, "Durable clear failed");
            }
        }
    }

    /// Held across every step that touches the durable tier. None without one.
    async fn durable_gate(&self) -> Option<MutexGuard<'_, ()>> {
        match self.durable {
            Some(_) => Some(self.durable_gate.lock().await),
            None => None,
        }
    }

    async fn join_flight(&self, key: &str) -> FlightGuard {
        let gate = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            flights.entry(key.to_string()).or_default().clone()
        };
        let permit = gate.lock_owned().await;
        FlightGuard {
            key: key.to_string(),
            flights: self.flights.clone(),
            permit: Some(permit),
        }
    }
}

// == Flight Guard ==
/// Holds the per-key producer gate. Dropping it releases the gate and
/// forgets the key once nobody else is waiting on it.
struct FlightGuard {
    key: String,
    flights: Flights,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the gate under this lock, so a count of one means only the map holds it
        if flights
            .get(&self.key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            flights.remove(&self.key);
        }
    }
}
