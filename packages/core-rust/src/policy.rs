//! Staleness policies deciding when a cached entry must be refreshed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::StorageEntry;

/// Maximum number of [`StalenessPolicy::KeyResolved`] indirections followed
/// before the entry is treated as stale.
const MAX_RESOLUTION_DEPTH: usize = 8;

/// Arbitrary staleness predicate over (key, entry, now-millis).
pub type StalenessFn<K, V> = Arc<dyn Fn(&K, &StorageEntry<V>, i64) -> bool + Send + Sync>;

/// Resolves the policy to apply for a particular key and entry.
pub type PolicyResolverFn<K, V> =
    Arc<dyn Fn(&K, &StorageEntry<V>) -> StalenessPolicy<K, V> + Send + Sync>;

/// Decides whether a cached entry must be refreshed from the origin.
///
/// An entry carrying the invalidation marker (`store_time <= 0`) is stale
/// under every variant except [`StalenessPolicy::NeverStale`], regardless of
/// what the variant's own predicate would say.
pub enum StalenessPolicy<K, V> {
    /// Entries never go stale; only a forced reload reaches the origin.
    NeverStale,
    /// Stale once the entry is older than the given duration.
    MaxAge(Duration),
    /// Delegate to an arbitrary predicate.
    Delegated(StalenessFn<K, V>),
    /// Resolve a policy per key and entry, then apply it. Lets one family
    /// mix lifetimes, e.g. a shorter age limit for a volatile subset of
    /// keys.
    KeyResolved(PolicyResolverFn<K, V>),
}

impl<K, V> StalenessPolicy<K, V> {
    /// Policy that refreshes entries older than `max_age`.
    #[must_use]
    pub fn max_age(max_age: Duration) -> Self {
        Self::MaxAge(max_age)
    }

    /// Policy delegating to `predicate`.
    pub fn delegated(
        predicate: impl Fn(&K, &StorageEntry<V>, i64) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Delegated(Arc::new(predicate))
    }

    /// Policy resolved per key and entry by `resolver`.
    pub fn key_resolved(
        resolver: impl Fn(&K, &StorageEntry<V>) -> StalenessPolicy<K, V> + Send + Sync + 'static,
    ) -> Self {
        Self::KeyResolved(Arc::new(resolver))
    }

    /// Whether `entry` must be refreshed at `now_millis`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn is_stale(&self, key: &K, entry: &StorageEntry<V>, now_millis: i64) -> bool {
        if matches!(self, Self::NeverStale) {
            return false;
        }
        // Invalidated entries are stale under every policy that can go
        // stale at all.
        if entry.is_invalidated() {
            return true;
        }

        let mut current = self.clone();
        for _ in 0..MAX_RESOLUTION_DEPTH {
            match current {
                Self::NeverStale => return false,
                Self::MaxAge(max_age) => {
                    // Age limits are reasonable millisecond durations, not near u128::MAX.
                    let max_age_millis = max_age.as_millis() as i64;
                    return entry.store_time < now_millis.saturating_sub(max_age_millis);
                }
                Self::Delegated(predicate) => return predicate(key, entry, now_millis),
                Self::KeyResolved(resolver) => current = resolver(key, entry),
            }
        }

        tracing::warn!(
            depth = MAX_RESOLUTION_DEPTH,
            "key-resolved staleness policy did not settle; treating entry as stale"
        );
        true
    }
}

impl<K, V> Clone for StalenessPolicy<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::NeverStale => Self::NeverStale,
            Self::MaxAge(max_age) => Self::MaxAge(*max_age),
            Self::Delegated(predicate) => Self::Delegated(Arc::clone(predicate)),
            Self::KeyResolved(resolver) => Self::KeyResolved(Arc::clone(resolver)),
        }
    }
}

impl<K, V> Default for StalenessPolicy<K, V> {
    fn default() -> Self {
        Self::NeverStale
    }
}

impl<K, V> fmt::Debug for StalenessPolicy<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverStale => f.write_str("NeverStale"),
            Self::MaxAge(max_age) => f.debug_tuple("MaxAge").field(max_age).finish(),
            Self::Delegated(_) => f.write_str("Delegated"),
            Self::KeyResolved(_) => f.write_str("KeyResolved"),
        }
    }
}
