//! Family-level coordination: the lazy per-key registry and the
//! construction presets.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use wellspring_core::{CacheError, ClockSource, Resource, StalenessPolicy, SystemClock};

use crate::config;
use crate::origin::Fetch;
use crate::storage::{CodecStorage, DecodeFn, MemoryBackend, StorageBackend};

use super::key::KeyCache;
use super::subscription::ResourceSubscription;

/// Construction options shared by every preset.
///
/// `cache_last_emitted: None` picks the preset default: enabled everywhere
/// except secure families, whose values must not linger in process memory.
pub struct CacheOptions<K, V> {
    /// Origin loader. Without one the family serves the store alone.
    pub fetch: Option<Arc<dyn Fetch<K, V>>>,
    /// When cached entries must be refreshed.
    pub policy: StalenessPolicy<K, V>,
    /// Clock stamping stored values, injectable for tests.
    pub clock: Arc<dyn ClockSource>,
    /// Overrides the preset's last-emitted-slot default.
    pub cache_last_emitted: Option<bool>,
    /// Decode hook for the persistent and secure presets. `None` uses plain
    /// serde deserialization.
    pub decode: Option<DecodeFn<V>>,
}

impl<K, V> Default for CacheOptions<K, V> {
    fn default() -> Self {
        Self {
            fetch: None,
            policy: StalenessPolicy::NeverStale,
            clock: Arc::new(SystemClock),
            cache_last_emitted: None,
            decode: None,
        }
    }
}

/// One resource family: a lazy `key -> KeyCache` registry sharing a storage
/// backend, origin, staleness policy, and clock.
///
/// Every key operation creates the per-key coordinator on first touch.
/// `remove` and `clear_all` close coordinators and erase them from the
/// registry; a later operation on the same key starts over with a fresh
/// coordinator.
pub struct ResourceCache<K, V> {
    name: String,
    storage: Arc<dyn StorageBackend<K, V>>,
    fetch: Option<Arc<dyn Fetch<K, V>>>,
    policy: StalenessPolicy<K, V>,
    clock: Arc<dyn ClockSource>,
    cache_last_emitted: bool,
    registry: AsyncMutex<HashMap<K, Arc<KeyCache<K, V>>>>,
}

impl<K, V> ResourceCache<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a family over an explicit storage backend.
    #[must_use]
    pub fn with_storage(
        name: impl Into<String>,
        storage: Arc<dyn StorageBackend<K, V>>,
        options: CacheOptions<K, V>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            fetch: options.fetch,
            policy: options.policy,
            clock: options.clock,
            cache_last_emitted: options.cache_last_emitted.unwrap_or(true),
            registry: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Creates a family over the built-in in-memory backend.
    #[must_use]
    pub fn in_memory(name: impl Into<String>, options: CacheOptions<K, V>) -> Self {
        let storage = Arc::new(MemoryBackend::new(Arc::clone(&options.clock)));
        Self::with_storage(name, storage, options)
    }

    /// The family name, doubling as the storage name for the persistent and
    /// secure presets.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to a key's resource stream and requests a load.
    pub async fn subscribe(
        &self,
        key: &K,
        force_reload: bool,
    ) -> Result<ResourceSubscription<V>, CacheError> {
        self.coordinator(key).await.subscribe(force_reload)
    }

    /// First settled resource for a key: a non-loading state, or a loading
    /// state carrying data when `allow_loading` is set.
    pub async fn get(
        &self,
        key: &K,
        force_reload: bool,
        allow_loading: bool,
    ) -> Result<Resource<V>, CacheError> {
        self.coordinator(key)
            .await
            .get(force_reload, allow_loading)
            .await
    }

    /// Marks a key's entry stale; see
    /// [`KeyCache::invalidate`](super::key::KeyCache::invalidate).
    pub async fn invalidate(
        &self,
        key: &K,
        force_reload: bool,
        emit_loading_on_reload: bool,
    ) -> anyhow::Result<()> {
        self.coordinator(key)
            .await
            .invalidate(force_reload, emit_loading_on_reload)
            .await
    }

    /// Edits a key's stored value under its lock; see
    /// [`KeyCache::update_cached_value`](super::key::KeyCache::update_cached_value).
    pub async fn update_cached_value<F>(
        &self,
        key: &K,
        edit: F,
        notify_on_none: bool,
    ) -> anyhow::Result<Option<V>>
    where
        F: FnOnce(Option<V>) -> anyhow::Result<Option<V>> + Send,
    {
        self.coordinator(key)
            .await
            .update_cached_value(edit, notify_on_none)
            .await
    }

    /// The stored value for a key, if any.
    pub async fn get_cached_value(&self, key: &K, synchronized: bool) -> anyhow::Result<Option<V>> {
        self.coordinator(key)
            .await
            .get_cached_value(synchronized)
            .await
    }

    /// Stores a value with the current time and broadcasts `Success`.
    pub async fn put_value(&self, key: &K, value: V) -> anyhow::Result<()> {
        self.coordinator(key).await.put_value(value).await
    }

    /// Removes a key's stored entry without closing its coordinator.
    pub async fn clear_cache(&self, key: &K) -> anyhow::Result<()> {
        self.coordinator(key).await.clear_cache().await
    }

    /// Whether any subscription is attached to `key`. Does not create a
    /// coordinator.
    pub async fn has_subscribers(&self, key: &K) -> bool {
        self.registry
            .lock()
            .await
            .get(key)
            .is_some_and(|coordinator| coordinator.has_subscribers())
    }

    /// Closes and erases a key's coordinator and deletes its entry from
    /// storage.
    pub async fn remove(&self, key: &K) -> anyhow::Result<()> {
        let mut registry = self.registry.lock().await;
        if let Some(coordinator) = registry.remove(key) {
            coordinator.close();
        }
        self.storage.remove(key).await?;
        tracing::debug!(family = %self.name, key = ?key, "removed key coordinator");
        Ok(())
    }

    /// Erases the whole registry, optionally closing every coordinator, and
    /// clears the storage.
    ///
    /// Two-phase: coordinators are detached under the registry lock and
    /// closed after it is released, so nothing observed during close can
    /// contend with the registry.
    pub async fn clear_all(&self, close_subscriptions: bool) -> anyhow::Result<()> {
        let detached: Vec<Arc<KeyCache<K, V>>> = {
            let mut registry = self.registry.lock().await;
            registry.drain().map(|(_, coordinator)| coordinator).collect()
        };
        if close_subscriptions {
            for coordinator in &detached {
                coordinator.close();
            }
        }
        self.storage.clear().await?;
        tracing::debug!(
            family = %self.name,
            detached = detached.len(),
            closed = close_subscriptions,
            "cleared all cached values"
        );
        Ok(())
    }

    /// The per-key coordinator, created on first touch.
    async fn coordinator(&self, key: &K) -> Arc<KeyCache<K, V>> {
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.get(key) {
            return Arc::clone(existing);
        }
        let coordinator = KeyCache::new(
            key.clone(),
            self.name.clone(),
            Arc::clone(&self.storage),
            self.fetch.clone(),
            self.policy.clone(),
            Arc::clone(&self.clock),
            self.cache_last_emitted,
        );
        registry.insert(key.clone(), Arc::clone(&coordinator));
        tracing::debug!(family = %self.name, key = ?key, "created key coordinator");
        coordinator
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Serialize + Send + Sync + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a family over the registered persistent storage factory.
    ///
    /// Fails with [`CacheError::ConfigurationMissing`] when no persistent
    /// factory has been registered.
    pub fn persistent(
        name: impl Into<String>,
        options: CacheOptions<K, V>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let factory = config::persistent_factory(&name)?;
        let raw = factory.create(&name)?;
        let storage: CodecStorage<K, V> = match options.decode.clone() {
            Some(decode) => CodecStorage::with_decode(raw, Arc::clone(&options.clock), decode),
            None => CodecStorage::new(raw, Arc::clone(&options.clock)),
        };
        Ok(Self::with_storage(name, Arc::new(storage), options))
    }

    /// Creates a family over the registered secure storage factory.
    ///
    /// Fails with [`CacheError::ConfigurationMissing`] when no secure
    /// factory has been registered. The last-emitted slot defaults to
    /// disabled so secrets do not remain in process memory after emission.
    pub fn secure(
        name: impl Into<String>,
        mut options: CacheOptions<K, V>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let factory = config::secure_factory(&name)?;
        let raw = factory.create(&name)?;
        options.cache_last_emitted = Some(options.cache_last_emitted.unwrap_or(false));
        let storage: CodecStorage<K, V> = match options.decode.clone() {
            Some(decode) => CodecStorage::with_decode(raw, Arc::clone(&options.clock), decode),
            None => CodecStorage::new(raw, Arc::clone(&options.clock)),
        };
        Ok(Self::with_storage(name, Arc::new(storage), options))
    }

    /// Creates a family over the in-memory storage factory (the built-in
    /// one unless replaced via configuration).
    pub fn in_memory_factory(
        name: impl Into<String>,
        options: CacheOptions<K, V>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        let raw = config::in_memory_factory().create(&name)?;
        let storage: CodecStorage<K, V> = match options.decode.clone() {
            Some(decode) => CodecStorage::with_decode(raw, Arc::clone(&options.clock), decode),
            None => CodecStorage::new(raw, Arc::clone(&options.clock)),
        };
        Ok(Self::with_storage(name, Arc::new(storage), options))
    }
}
