//! Type-erased JSON-shaped storage interface and the built-in in-memory
//! implementation.
//!
//! External persistence (on-disk files, secret stores) integrates here:
//! implementations persist opaque JSON under string keys and never see the
//! typed values. The persistent and secure construction presets resolve a
//! [`RawStorageFactory`] from the process-wide configuration.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

/// One raw entry: an encoded value plus its store time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    /// The encoded value.
    pub value: serde_json::Value,
    /// When the value was stored, in milliseconds. `0` = invalidated.
    pub store_time: i64,
}

/// JSON-shaped backend with string keys.
///
/// Used as `Arc<dyn RawStorage>`. Implementations must tolerate concurrent
/// task access.
#[async_trait]
pub trait RawStorage: Send + Sync {
    /// Returns the raw entry for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> anyhow::Result<Option<RawEntry>>;

    /// Stores `value` under `key` at `store_time`.
    async fn put(&self, key: &str, value: serde_json::Value, store_time: i64)
        -> anyhow::Result<()>;

    /// Removes the entry for `key`, if present.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// Constructs a [`RawStorage`] for a family's storage name.
///
/// A factory is the unit registered with the process-wide configuration;
/// repeated calls with the same name must hand out views over the same
/// underlying data.
pub trait RawStorageFactory: Send + Sync + std::fmt::Debug {
    /// Creates (or reopens) the storage for `storage_name`.
    fn create(&self, storage_name: &str) -> anyhow::Result<Arc<dyn RawStorage>>;
}

/// In-memory [`RawStorage`]: the built-in default and the standard test
/// double for the persistent and secure presets.
#[derive(Debug, Default)]
pub struct MemoryRawStorage {
    entries: DashMap<String, RawEntry>,
}

impl MemoryRawStorage {
    /// Creates an empty raw storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawStorage for MemoryRawStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<RawEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        store_time: i64,
    ) -> anyhow::Result<()> {
        self.entries
            .insert(key.to_string(), RawEntry { value, store_time });
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Factory handing out one shared [`MemoryRawStorage`] per storage name.
///
/// Reconstructing a family with the same name reopens the same data, which
/// mirrors how a real persistent factory behaves across process restarts.
#[derive(Debug, Default)]
pub struct MemoryRawStorageFactory {
    stores: DashMap<String, Arc<MemoryRawStorage>>,
}

impl MemoryRawStorageFactory {
    /// Creates a factory with no stores yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawStorageFactory for MemoryRawStorageFactory {
    fn create(&self, storage_name: &str) -> anyhow::Result<Arc<dyn RawStorage>> {
        let store = self
            .stores
            .entry(storage_name.to_string())
            .or_default()
            .clone();
        Ok(store)
    }
}
