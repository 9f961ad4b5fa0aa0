//! Cache Entry Module
//!
//! Defines individual cache entries and the generation counter they are
//! stamped with.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::clock::add_ttl;
use crate::cache::Category;

// == Generation ==
/// Monotonic invalidation counter owned by one cache instance.
///
/// Every entry captures the generation current at write time. An entry whose
/// generation is behind the cache's is treated as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation after this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// == Cache Entry ==
/// A single cached value plus its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the entry was written
    pub stored_at: DateTime<Utc>,
    /// Last instant at which the entry is still fresh
    pub expires_at: DateTime<Utc>,
    /// Generation current at write time
    pub generation: Generation,
    /// Category the TTL was resolved from, if any
    pub category: Option<Category>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry stored at `now` that lives for `ttl`.
    pub fn new(
        value: V,
        now: DateTime<Utc>,
        ttl: Duration,
        generation: Generation,
        category: Option<Category>,
    ) -> Self {
        Self {
            value,
            stored_at: now,
            expires_at: add_ttl(now, ttl),
            generation,
            category,
        }
    }

    /// Creates an entry with an absolute expiry, used when promoting durable records.
    ///
    /// An expiry earlier than `now` is clamped so `expires_at >= stored_at` holds.
    pub fn with_expiry(
        value: V,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        generation: Generation,
        category: Option<Category>,
    ) -> Self {
        Self {
            value,
            stored_at: now,
            expires_at: expires_at.max(now),
            generation,
            category,
        }
    }

    // == Freshness ==
    /// True once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True if the entry was written under an older generation.
    pub fn is_stale(&self, current: Generation) -> bool {
        self.generation < current
    }

    /// Fresh means neither expired nor stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, current: Generation) -> bool {
        !self.is_expired(now) && !self.is_stale(current)
    }

    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

// == Entry Info ==
/// Metadata view of an entry, without the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub generation: Generation,
    pub category: Option<Category>,
}

impl<V> From<&CacheEntry<V>> for EntryInfo {
    fn from(entry: &CacheEntry<V>) -> Self {
        Self {
            stored_at: entry.stored_at,
            expires_at: entry.expires_at,
            generation: entry.generation,
            category: entry.category,
        }
    }
}
