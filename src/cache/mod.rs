//! Cache Module
//!
//! Tiered TTL cache: an in-memory entry store with category TTL policy and
//! age-based eviction, composed with an optional durable tier.

mod clock;
mod deps;
mod entry;
mod eviction;
mod policy;
mod stats;
mod store;
mod tiered;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use deps::{deps_key, fingerprint, DEPS_SUFFIX};
pub use entry::{CacheEntry, EntryInfo, Generation};
pub use eviction::{EvictionReport, EVICTION_PERCENT};
pub use policy::{Category, TtlPolicy};
pub use stats::CacheStats;
pub use store::{EntryStore, Lookup};
pub use tiered::{EntryOptions, TieredCache, TieredCacheBuilder};
