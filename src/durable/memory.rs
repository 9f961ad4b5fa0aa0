//! In-process durable tier.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::durable::DurableTier;
use crate::error::Result;

/// Durable tier backed by a map. Survives cache instances, not processes.
#[derive(Debug, Default)]
pub struct MemoryDurableTier {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDurableTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }
}

#[async_trait]
impl DurableTier for MemoryDurableTier {
    async fn persist_set(&self, key: &str, blob: Vec<u8>, _ttl: Duration) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), blob);
        Ok(())
    }

    async fn persist_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn persist_delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn persist_clear_all(&self, prefix: &str) -> Result<()> {
        self.blobs
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
