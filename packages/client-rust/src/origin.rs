//! Origin call traits: the external source a family refreshes from.

use async_trait::async_trait;

use wellspring_core::PageResponse;

/// Loads the authoritative value for a key from the origin.
///
/// Used as `Arc<dyn Fetch<K, V>>`. The coordinator guarantees at most one
/// call per key is in flight at any instant. Timeouts are the
/// implementation's responsibility: a fetch that never completes blocks
/// further refreshes for its key.
#[async_trait]
pub trait Fetch<K, V>: Send + Sync {
    /// Loads the value for `key`.
    async fn fetch(&self, key: &K) -> anyhow::Result<V>;
}

/// Loads one page by offset and limit (offset+intersection strategy).
#[async_trait]
pub trait OffsetPageSource<K, V>: Send + Sync {
    /// Returns up to `limit` items starting at `offset`. A result shorter
    /// than `limit` marks the end of the sequence.
    async fn load_page(&self, key: &K, offset: usize, limit: usize) -> anyhow::Result<Vec<V>>;
}

/// Loads one page by page number and size (page+size strategy).
#[async_trait]
pub trait SizePageSource<K, V, M>: Send + Sync {
    /// Returns page `page` (1-based) of up to `size` items. A page shorter
    /// than `size` marks the end of the sequence.
    async fn load_page(&self, key: &K, page: u32, size: usize)
        -> anyhow::Result<PageResponse<V, M>>;
}
