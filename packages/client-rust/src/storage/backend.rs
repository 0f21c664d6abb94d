//! Typed storage backend trait.

use async_trait::async_trait;

use wellspring_core::StorageEntry;

/// Key-value store of last known values with store timestamps.
///
/// One backend instance is shared by every key of a family; implementations
/// must tolerate concurrent task access. Entries live until removed or
/// cleared; there is no eviction.
///
/// Used as `Arc<dyn StorageBackend<K, V>>`.
#[async_trait]
pub trait StorageBackend<K, V>: Send + Sync {
    /// Returns the stored entry for `key`, or `None` if absent.
    async fn get_or_null(&self, key: &K) -> anyhow::Result<Option<StorageEntry<V>>>;

    /// Stores `value` under `key`.
    ///
    /// When `store_time` is `None` the backend substitutes its own clock's
    /// current time. Store times written by one backend instance must be
    /// monotonic-comparable across puts.
    async fn put(&self, key: &K, value: V, store_time: Option<i64>) -> anyhow::Result<()>;

    /// Removes the entry for `key`, if present.
    async fn remove(&self, key: &K) -> anyhow::Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> anyhow::Result<()>;
}
