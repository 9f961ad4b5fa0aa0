//! Expiry Sweeper Task
//!
//! Background task that periodically removes expired and stale entries from
//! the in-memory tier. The write path already sweeps when the store is full;
//! this task only bounds how long dead entries linger between writes.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::TieredCache;

/// Spawns a background task that sweeps `cache` every `interval`.
///
/// The task runs until its handle is aborted.
///
/// # Example
/// ```ignore
/// let cache: TieredCache<String> = TieredCache::from_config(&config).await;
/// let sweeper = spawn_sweeper_task(cache.clone(), Duration::from_secs(30));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_sweeper_task<V>(cache: TieredCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting cache sweeper task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.sweep_expired().await;
            if removed > 0 {
                info!(removed, "Cache sweep removed expired entries");
            } else {
                debug!("Cache sweep: no expired entries found");
            }
        }
    })
}

// == Sweeper Guard ==
/// Owns a sweeper task and aborts it when dropped.
#[derive(Debug)]
pub struct SweeperGuard {
    handle: JoinHandle<()>,
}

impl SweeperGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Stopped cache sweeper task");
    }
}
