//! Tiered Cache - an in-process TTL cache for remote data
//!
//! Provides per-category expiry, size-bounded eviction, a durable fallback
//! tier, dependency-based invalidation and stale-on-error reads.

pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod tasks;

pub use cache::{Category, EntryOptions, TieredCache, TieredCacheBuilder, TtlPolicy};
pub use config::Config;
pub use durable::{DurableTier, FsDurableTier, MemoryDurableTier};
pub use error::DurableError;
pub use tasks::spawn_sweeper_task;
