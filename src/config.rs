//! Configuration Module
//!
//! Loads cache configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{Category, TtlPolicy};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Entry count at which writes trigger eviction
    pub max_entries: usize,
    /// TTL in seconds for entries with neither explicit TTL nor category
    pub default_ttl: u64,
    /// Background sweep interval in seconds, 0 disables the sweeper
    pub sweep_interval: u64,
    /// Directory for the file durable tier, None runs memory-only
    pub durable_dir: Option<PathBuf>,
    /// De-duplicate concurrent misses for the same key
    pub single_flight: bool,
    /// Per-category TTL overrides in seconds
    pub category_ttls: HashMap<Category, u64>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum in-memory entries (default: 1000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_SWEEP_INTERVAL` - Sweeper interval in seconds (default: 0, off)
    /// - `CACHE_DURABLE_DIR` - Durable tier directory (default: unset)
    /// - `CACHE_SINGLE_FLIGHT` - `true`/`false` (default: true)
    /// - `CACHE_TTL_<CATEGORY>` - TTL override, e.g. `CACHE_TTL_LISTING=120`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let category_ttls = Category::ALL
            .iter()
            .filter_map(|c| parse_var(&format!("CACHE_TTL_{}", c.env_suffix())).map(|ttl| (*c, ttl)))
            .collect();

        Self {
            max_entries: parse_var("CACHE_MAX_ENTRIES").unwrap_or(defaults.max_entries),
            default_ttl: parse_var("CACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            sweep_interval: parse_var("CACHE_SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
            durable_dir: env::var("CACHE_DURABLE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            single_flight: parse_var("CACHE_SINGLE_FLIGHT").unwrap_or(defaults.single_flight),
            category_ttls,
        }
    }

    /// TTL policy with the built-in table, this config's default and overrides applied.
    pub fn ttl_policy(&self) -> TtlPolicy {
        self.category_ttls.iter().fold(
            TtlPolicy::new(Duration::from_secs(self.default_ttl)),
            |policy, (category, secs)| policy.with_ttl(*category, Duration::from_secs(*secs)),
        )
    }

    /// Sweeper interval, None when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval > 0).then(|| Duration::from_secs(self.sweep_interval))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            sweep_interval: 0,
            durable_dir: None,
            single_flight: true,
            category_ttls: HashMap::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
