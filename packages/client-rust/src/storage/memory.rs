//! In-memory [`StorageBackend`] implementation backed by [`DashMap`].

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use wellspring_core::{ClockSource, StorageEntry, SystemClock};

use super::backend::StorageBackend;

/// In-memory backend backed by [`DashMap`] for concurrent task access.
///
/// The injected clock supplies store times for puts that omit one.
pub struct MemoryBackend<K, V> {
    entries: DashMap<K, StorageEntry<V>>,
    clock: Arc<dyn ClockSource>,
}

impl<K: Eq + Hash, V> MemoryBackend<K, V> {
    /// Creates an empty backend stamping omitted store times with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl<K: Eq + Hash, V> Default for MemoryBackend<K, V> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl<K, V> StorageBackend<K, V> for MemoryBackend<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get_or_null(&self, key: &K) -> anyhow::Result<Option<StorageEntry<V>>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> anyhow::Result<()> {
        let store_time = store_time.unwrap_or_else(|| self.clock.now_millis());
        self.entries
            .insert(key.clone(), StorageEntry::new(value, store_time));
        Ok(())
    }

    async fn remove(&self, key: &K) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.entries.clear();
        Ok(())
    }
}
