//! Durable Tier Module
//!
//! Persistent key-value stores that mirror a subset of categories so a restart
//! does not cold-start them. The cache treats every failure here as
//! non-fatal.
//!
//! # Implementations
//! - `MemoryDurableTier`: process-local map, for tests and embedding
//! - `FsDurableTier`: one file per key under a directory

mod fs;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::{Category, Generation};
use crate::error::{DurableError, Result};

pub use fs::FsDurableTier;
pub use memory::MemoryDurableTier;

/// Reserved key holding the last persisted generation.
pub const GENERATION_KEY: &str = "__cache:generation";

// == Durable Tier Trait ==
/// Contract any persistent key-value store must satisfy to back the cache.
///
/// Blobs are opaque to implementations. `ttl` is advisory; the cache checks
/// expiry itself on read.
#[async_trait]
pub trait DurableTier: Send + Sync {
    async fn persist_set(&self, key: &str, blob: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn persist_get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting an absent key succeeds.
    async fn persist_delete(&self, key: &str) -> Result<()>;

    /// Removes every key starting with `prefix`; an empty prefix removes everything.
    async fn persist_clear_all(&self, prefix: &str) -> Result<()>;
}

// == Durable Record ==
/// Serialized form of a mirrored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableRecord<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
    pub epoch: Generation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl<V> DurableRecord<V> {
    /// Servable at `now` under `current`, checked exactly as the entry store does.
    pub fn is_fresh(&self, now: DateTime<Utc>, current: Generation) -> bool {
        now <= self.expires_at && self.epoch >= current
    }
}

impl<V: Serialize> DurableRecord<V> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<V: DeserializeOwned> DurableRecord<V> {
    pub fn decode(key: &str, blob: &[u8]) -> Result<Self> {
        serde_json::from_slice(blob).map_err(|e| DurableError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
