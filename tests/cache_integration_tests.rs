//! Integration Tests for the Tiered Cache
//!
//! Exercises the public API end to end: category TTLs, invalidation,
//! read-through with stale fallback, dependency invalidation, the file
//! durable tier across restarts and ordering between the two tiers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tiered_cache::cache::{Clock, Generation, ManualClock};
use tiered_cache::error::Result as DurableResult;
use tiered_cache::{
    Category, Config, DurableError, DurableTier, EntryOptions, FsDurableTier, MemoryDurableTier,
    TieredCache, TieredCacheBuilder,
};

// == Helper Functions ==

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u32,
    name: String,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tiered_cache=debug")
        .with_test_writer()
        .try_init();
}

fn manual_cache<V>(max_entries: usize) -> (TieredCache<V>, Arc<ManualClock>)
where
    V: Clone + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let cache = TieredCacheBuilder::new()
        .max_entries(max_entries)
        .clock(clock.clone())
        .build();
    (cache, clock)
}

/// Durable tier whose every call fails.
struct BrokenTier;

#[async_trait]
impl DurableTier for BrokenTier {
    async fn persist_set(&self, _key: &str, _blob: Vec<u8>, _ttl: Duration) -> DurableResult<()> {
        Err(DurableError::Unavailable("disk full".to_string()))
    }

    async fn persist_get(&self, _key: &str) -> DurableResult<Option<Vec<u8>>> {
        Err(DurableError::Unavailable("disk gone".to_string()))
    }

    async fn persist_delete(&self, _key: &str) -> DurableResult<()> {
        Err(DurableError::Unavailable("read-only".to_string()))
    }

    async fn persist_clear_all(&self, _prefix: &str) -> DurableResult<()> {
        Err(DurableError::Unavailable("read-only".to_string()))
    }
}

/// Durable tier that parks every write until `release` is notified.
#[derive(Default)]
struct GatedTier {
    inner: MemoryDurableTier,
    write_started: Notify,
    release: Notify,
}

#[async_trait]
impl DurableTier for GatedTier {
    async fn persist_set(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> DurableResult<()> {
        self.write_started.notify_one();
        self.release.notified().await;
        self.inner.persist_set(key, blob, ttl).await
    }

    async fn persist_get(&self, key: &str) -> DurableResult<Option<Vec<u8>>> {
        self.inner.persist_get(key).await
    }

    async fn persist_delete(&self, key: &str) -> DurableResult<()> {
        self.inner.persist_delete(key).await
    }

    async fn persist_clear_all(&self, prefix: &str) -> DurableResult<()> {
        self.inner.persist_clear_all(prefix).await
    }
}

/// Starts a profile write and returns once it is parked in the durable tier.
async fn parked_profile_write(tier: &Arc<GatedTier>) -> (TieredCache<String>, JoinHandle<()>) {
    init_tracing();
    let cache: TieredCache<String> = TieredCacheBuilder::new().durable(tier.clone()).build();
    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .set("profile:1", "secret".to_string(), EntryOptions::category(Category::Profile))
                .await;
        })
    };
    tier.write_started.notified().await;
    (cache, writer)
}

// == TTL ==

#[tokio::test]
async fn test_category_ttl_defaulting() {
    let (cache, clock) = manual_cache::<String>(100);

    cache
        .set("listing:7", "Backend Engineer".to_string(), EntryOptions::category(Category::Listing))
        .await;
    let info = cache.entry_info("listing:7").await.unwrap();
    assert_eq!(
        (info.expires_at - info.stored_at).to_std().unwrap(),
        Duration::from_secs(300)
    );

    clock.advance(Duration::from_secs(300));
    assert!(cache.has("listing:7").await);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get("listing:7").await, None);
}

#[tokio::test]
async fn test_explicit_ttl_beats_category() {
    let (cache, clock) = manual_cache::<String>(100);

    cache
        .set(
            "static:countries",
            "[]".to_string(),
            EntryOptions::category(Category::Static).with_ttl(Duration::from_secs(5)),
        )
        .await;
    clock.advance(Duration::from_secs(6));

    assert!(!cache.has("static:countries").await);
}

// == Invalidation ==

#[tokio::test]
async fn test_prefix_invalidation_scoped_to_user() {
    let (cache, _) = manual_cache::<String>(100);
    let opts = EntryOptions::default();

    cache.set("user:1:profile", "alice".to_string(), opts).await;
    cache.set("user:1:apps", "3 applications".to_string(), opts).await;
    cache.set("user:2:profile", "bob".to_string(), opts).await;

    assert_eq!(cache.invalidate_by_prefix("user:1").await, 2);

    assert_eq!(cache.get("user:1:profile").await, None);
    assert_eq!(cache.get("user:1:apps").await, None);
    assert_eq!(cache.get("user:2:profile").await, Some("bob".to_string()));
}

#[tokio::test]
async fn test_delete_absent_key_is_noop() {
    let (cache, _) = manual_cache::<String>(100);

    cache.delete("never-set").await;
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_bump_epoch_hides_everything() {
    let (cache, _) = manual_cache::<String>(100);
    for i in 0..20 {
        cache
            .set(&format!("alerting:{}", i), "n".to_string(), EntryOptions::category(Category::Alerting))
            .await;
    }

    assert_eq!(cache.bump_epoch().await, Generation::new(1));

    for i in 0..20 {
        assert_eq!(cache.get(&format!("alerting:{}", i)).await, None);
    }
    let stats = cache.stats().await;
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.generation, 1);
}

// == Eviction ==

#[tokio::test]
async fn test_eviction_bound() {
    let max_entries = 10;
    let (cache, clock) = manual_cache::<u32>(max_entries);
    let forever = EntryOptions::ttl(Duration::MAX);

    for i in 0..=max_entries as u32 {
        cache.set(&format!("k{}", i), i, forever).await;
        clock.advance(Duration::from_millis(5));
        assert!(cache.len().await <= max_entries);
    }

    // Oldest 30% made room for k10
    assert_eq!(cache.len().await, 8);
    assert_eq!(cache.get("k0").await, None);
    assert_eq!(cache.get("k10").await, Some(10));
    assert_eq!(cache.stats().await.evictions, 3);
}

// == Get Or Fetch ==

#[tokio::test]
async fn test_stale_on_error_fallback() {
    let (cache, clock) = manual_cache::<String>(100);

    cache
        .set("submission-tracking:u1", "2 pending".to_string(), EntryOptions::category(Category::SubmissionTracking))
        .await;
    clock.advance(Duration::from_secs(3600));

    let value = cache
        .get_or_fetch(
            "submission-tracking:u1",
            EntryOptions::category(Category::SubmissionTracking),
            || async { Err::<String, _>(anyhow!("backend unreachable")) },
        )
        .await
        .unwrap();

    assert_eq!(value, "2 pending");
}

#[tokio::test]
async fn test_fresh_overrides_stale() {
    let (cache, clock) = manual_cache::<String>(100);
    let opts = EntryOptions::category(Category::AdminAggregate);

    cache.set("admin-aggregate:users", "100".to_string(), opts).await;
    let before = cache.entry_info("admin-aggregate:users").await.unwrap();
    clock.advance(Duration::from_secs(600));

    let value = cache
        .get_or_fetch("admin-aggregate:users", opts, || async {
            Ok::<_, anyhow::Error>("120".to_string())
        })
        .await
        .unwrap();

    assert_eq!(value, "120");
    let after = cache.entry_info("admin-aggregate:users").await.unwrap();
    assert!(after.stored_at > before.stored_at);
    assert_eq!(after.stored_at, clock.now());
}

#[tokio::test]
async fn test_producer_error_propagates_without_stale() {
    let (cache, _) = manual_cache::<String>(100);

    let err = cache
        .get_or_fetch("derived-analysis:cv-1", EntryOptions::default(), || async {
            Err::<String, _>(anyhow!("model quota exceeded"))
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "model quota exceeded");
    assert_eq!(cache.stats().await.stale_served, 0);
}

#[tokio::test]
async fn test_dependency_change_forces_refetch() {
    let (cache, _) = manual_cache::<String>(100);
    let calls = AtomicUsize::new(0);
    let opts = EntryOptions::category(Category::DerivedAnalysis);

    let produce = |label: &'static str| {
        let calls = &calls;
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(label.to_string())
        }
    };

    let first = cache
        .get_or_fetch_with_deps("derived-analysis:match", &["a", "b"], opts, produce("first"))
        .await
        .unwrap();
    let second = cache
        .get_or_fetch_with_deps("derived-analysis:match", &["a", "c"], opts, produce("second"))
        .await
        .unwrap();

    assert_eq!(first, "first");
    assert_eq!(second, "second");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_misses_without_single_flight() {
    init_tracing();
    let cache: TieredCache<u64> = TieredCacheBuilder::new().single_flight(false).build();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch("listing:count", EntryOptions::default(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, anyhow::Error>(7)
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), 7);
    }
    // Every concurrent miss ran its own producer
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// == Durable Tier ==

#[tokio::test]
async fn test_durable_tier_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        durable_dir: Some(dir.path().to_path_buf()),
        ..Config::default()
    };
    let profile = Profile {
        id: 1,
        name: "Alice".to_string(),
    };

    {
        let cache: TieredCache<Profile> = TieredCache::from_config(&config).await;
        cache
            .set("profile:1", profile.clone(), EntryOptions::category(Category::Profile))
            .await;
        cache
            .set(
                "listing:1",
                Profile { id: 9, name: "not durable".to_string() },
                EntryOptions::category(Category::Listing),
            )
            .await;
    }

    let restarted: TieredCache<Profile> = TieredCache::from_config(&config).await;
    assert!(restarted.is_empty().await);
    assert_eq!(restarted.get("profile:1").await, Some(profile));
    assert_eq!(restarted.get("listing:1").await, None);
    assert_eq!(restarted.len().await, 1, "Durable hit is promoted to memory");
}

#[tokio::test]
async fn test_bump_epoch_persists_across_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        durable_dir: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    let cache: TieredCache<String> = TieredCache::from_config(&config).await;
    cache
        .set("template:cover", "Dear...".to_string(), EntryOptions::category(Category::Template))
        .await;
    cache.bump_epoch().await;
    drop(cache);

    let restarted: TieredCache<String> = TieredCache::from_config(&config).await;
    assert_eq!(restarted.generation().await, Generation::new(1));
    assert_eq!(restarted.get("template:cover").await, None);
}

#[tokio::test]
async fn test_durable_failures_are_swallowed() {
    init_tracing();
    let cache: TieredCache<String> = TieredCacheBuilder::new()
        .durable(Arc::new(BrokenTier))
        .build();
    let opts = EntryOptions::category(Category::Profile);

    cache.set("profile:1", "alice".to_string(), opts).await;
    assert_eq!(cache.get("profile:1").await, Some("alice".to_string()));
    assert_eq!(cache.get("profile:2").await, None);

    cache.delete("profile:1").await;
    cache.invalidate_by_category(Category::Profile).await;
    cache.bump_epoch().await;
    assert_eq!(cache.restore_generation().await, Generation::new(1));

    let fetched = cache
        .get_or_fetch("profile:3", opts, || async { Ok::<_, anyhow::Error>("carol".to_string()) })
        .await
        .unwrap();
    assert_eq!(fetched, "carol");
}

#[tokio::test]
async fn test_invalidation_reaches_durable_tier() {
    init_tracing();
    let tier = Arc::new(MemoryDurableTier::new());
    let cache: TieredCache<String> = TieredCacheBuilder::new().durable(tier.clone()).build();
    let opts = EntryOptions::category(Category::Profile);

    cache.set("profile:1", "a".to_string(), opts).await;
    cache.set("profile:2", "b".to_string(), opts).await;
    cache.set("template:1", "t".to_string(), EntryOptions::category(Category::Template)).await;

    cache.delete("profile:1").await;
    assert!(!tier.contains("profile:1").await);

    cache.invalidate_by_category(Category::Profile).await;
    assert!(!tier.contains("profile:2").await);
    assert!(tier.contains("template:1").await);
}

#[tokio::test]
async fn test_fs_tier_expired_record_not_served() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let tier = Arc::new(FsDurableTier::open(dir.path()).await.unwrap());
    let clock = Arc::new(ManualClock::default());

    let writer: TieredCache<String> = TieredCacheBuilder::new()
        .clock(clock.clone())
        .durable(tier.clone())
        .build();
    writer
        .set(
            "profile:1",
            "alice".to_string(),
            EntryOptions::category(Category::Profile).with_ttl(Duration::from_secs(10)),
        )
        .await;

    clock.advance(Duration::from_secs(11));
    let reader: TieredCache<String> = TieredCacheBuilder::new()
        .clock(clock.clone())
        .durable(tier.clone())
        .build();

    assert_eq!(reader.get("profile:1").await, None);
    assert_eq!(tier.persist_get("profile:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_during_durable_write_stays_deleted() {
    let tier = Arc::new(GatedTier::default());
    let (cache, writer) = parked_profile_write(&tier).await;

    let deleter = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.delete("profile:1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    tier.release.notify_one();

    writer.await.unwrap();
    deleter.await.unwrap();

    assert_eq!(cache.get("profile:1").await, None);
    assert!(!tier.inner.contains("profile:1").await);
}

#[tokio::test]
async fn test_invalidation_during_durable_write_stays_invalidated() {
    let tier = Arc::new(GatedTier::default());
    let (cache, writer) = parked_profile_write(&tier).await;

    let invalidator = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.invalidate_by_category(Category::Profile).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    tier.release.notify_one();

    writer.await.unwrap();
    assert_eq!(invalidator.await.unwrap(), 1);

    assert_eq!(cache.get("profile:1").await, None);
    assert!(tier.inner.is_empty().await);
}

#[tokio::test]
async fn test_reserved_prefix_invalidation_keeps_generation() {
    init_tracing();
    let tier = Arc::new(MemoryDurableTier::new());
    let cache: TieredCache<String> = TieredCacheBuilder::new().durable(tier.clone()).build();

    cache.bump_epoch().await;
    cache.invalidate_by_prefix("__").await;

    let restarted: TieredCache<String> = TieredCacheBuilder::new().durable(tier.clone()).build();
    assert_eq!(restarted.restore_generation().await, Generation::new(1));
}

// == Background Sweep ==

#[tokio::test]
async fn test_configured_sweep_interval_reclaims_expired_entries() {
    init_tracing();
    let config = Config {
        sweep_interval: 1,
        ..Config::default()
    };
    let cache: TieredCache<String> = TieredCache::from_config(&config).await;

    cache
        .set("alerting:1", "deadline".to_string(), EntryOptions::ttl(Duration::ZERO))
        .await;
    assert_eq!(cache.len().await, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.len().await, 0, "Sweeper should have removed the expired entry");
}

// == Stats ==

#[tokio::test]
async fn test_dependency_ledger_bounded_by_capacity() {
    let (cache, clock) = manual_cache::<String>(2);

    for i in 0..200 {
        let key = format!("derived-analysis:{}", i);
        cache
            .get_or_fetch_with_deps(&key, &["resume:1", "listing:1"], EntryOptions::default(), || async {
                Ok::<_, anyhow::Error>("score".to_string())
            })
            .await
            .unwrap();
        clock.advance(Duration::from_millis(1));
    }

    let stats = cache.stats().await;
    assert_eq!(stats.total_entries, 2);
    assert!(stats.fingerprints <= stats.total_entries, "{} fingerprints held", stats.fingerprints);

    cache.delete("derived-analysis:199").await;
    assert!(cache.stats().await.fingerprints <= 1);
}


#[tokio::test]
async fn test_stats_report_real_hit_rate() {
    let (cache, clock) = manual_cache::<String>(100);

    cache.set("a", "1".to_string(), EntryOptions::ttl(Duration::from_secs(10))).await;
    cache.set("b", "2".to_string(), EntryOptions::ttl(Duration::from_secs(100))).await;
    cache.get("a").await;
    cache.get("a").await;
    cache.get("missing").await;
    clock.advance(Duration::from_secs(20));

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.valid_entries, 1);
    assert_eq!(stats.expired_entries, 1);
    assert!(stats.memory_estimate_bytes > 0);
}
