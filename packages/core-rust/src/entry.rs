//! Stored value plus store-time pair.

use serde::{Deserialize, Serialize};

/// A cached value together with the instant it was stored.
///
/// `store_time` is in the backend clock's milliseconds. The value `0` is
/// reserved as the invalidation marker: an entry with `store_time <= 0` is
/// treated as stale by every staleness policy except
/// [`StalenessPolicy::NeverStale`](crate::policy::StalenessPolicy::NeverStale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry<V> {
    /// The stored value.
    pub value: V,
    /// When the value was stored, in milliseconds. `0` = invalidated.
    #[serde(rename = "storeTime")]
    pub store_time: i64,
}

impl<V> StorageEntry<V> {
    /// Store-time marker for invalidated entries.
    pub const INVALIDATED: i64 = 0;

    /// Creates an entry stored at `store_time`.
    #[must_use]
    pub fn new(value: V, store_time: i64) -> Self {
        Self { value, store_time }
    }

    /// Returns the same value with `store_time` rewritten to the
    /// invalidation marker.
    #[must_use]
    pub fn invalidated(self) -> Self {
        Self {
            store_time: Self::INVALIDATED,
            ..self
        }
    }

    /// Whether this entry carries the invalidation marker.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.store_time <= Self::INVALIDATED
    }
}
